//! Strategy contract — a pure mapping from bar history + parameters to a signal.
//!
//! Strategies never see portfolio state or bars beyond the one being evaluated:
//! the simulator hands them `bars[..=t]` and an indicator view that ends at t.
//! Indicator-driven strategies declare their series through `indicators` so the
//! simulator computes them once per run instead of once per bar.

pub mod buy_and_hold;
pub mod ma_crossover;
pub mod momentum;
pub mod registry;
pub mod rsi_threshold;

pub use buy_and_hold::BuyAndHold;
pub use ma_crossover::{MaCrossover, MaType};
pub use momentum::Momentum;
pub use registry::StrategyRegistry;
pub use rsi_threshold::RsiThreshold;

use serde::{Deserialize, Serialize};

use crate::domain::Bar;
use crate::error::{ConfigError, StrategyError};
use crate::indicators::{precompute, Indicator, IndicatorView};
use crate::params::{ParamSchema, ParamSet};

/// Desired exposure after the next fill.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    /// Fully invested long.
    Long,
    /// No position.
    Flat,
    /// Fully invested short.
    Short,
    /// Explicit target weight of equity; negative is short.
    Target(f64),
    /// Keep whatever is currently held.
    Hold,
}

impl Signal {
    /// Requested weight of equity, `None` for `Hold`.
    pub fn target_weight(&self) -> Option<f64> {
        match self {
            Signal::Long => Some(1.0),
            Signal::Flat => Some(0.0),
            Signal::Short => Some(-1.0),
            Signal::Target(w) => Some(*w),
            Signal::Hold => None,
        }
    }

    /// Discrete signals leave an existing same-side position untouched.
    pub fn is_discrete(&self) -> bool {
        matches!(self, Signal::Long | Signal::Flat | Signal::Short)
    }
}

/// A trading strategy selected by name from the registry.
///
/// # Architecture invariant
/// `generate_signal` must be a pure function of `window` and `params`. The
/// window ends at the bar being evaluated; the signal is executed at the next
/// bar's open.
pub trait Strategy: Send + Sync {
    /// Registry id (e.g., "ma_crossover").
    fn name(&self) -> &str;

    /// One-line description for listings.
    fn description(&self) -> &str {
        ""
    }

    /// Declared parameters, ranges and defaults.
    fn schema(&self) -> ParamSchema;

    /// Cross-parameter constraints on a fully resolved set.
    fn validate(&self, _params: &ParamSet) -> Result<(), ConfigError> {
        Ok(())
    }

    /// Signal for the last bar of `window`.
    fn generate_signal(&self, window: &[Bar], params: &ParamSet) -> Result<Signal, StrategyError>;

    /// Indicator series `evaluate` reads, computed once per simulation.
    fn indicators(&self, _params: &ParamSet) -> Result<Vec<Box<dyn Indicator>>, StrategyError> {
        Ok(Vec::new())
    }

    /// Signal for the last bar of `window`, with precomputed indicators
    /// visible up to that bar. Defaults to `generate_signal`.
    fn evaluate(
        &self,
        window: &[Bar],
        _indicators: &IndicatorView<'_>,
        params: &ParamSet,
    ) -> Result<Signal, StrategyError> {
        self.generate_signal(window, params)
    }

    /// Schema-validate `params`, fill defaults, then apply `validate`.
    fn resolve_params(&self, params: &ParamSet) -> Result<ParamSet, ConfigError> {
        let resolved = self.schema().resolve(params)?;
        self.validate(&resolved)?;
        Ok(resolved)
    }
}

/// Compute `strategy`'s indicators over `window` alone and evaluate its last bar.
///
/// Strategies that override `evaluate` implement `generate_signal` with this.
pub fn evaluate_window<S: Strategy + ?Sized>(
    strategy: &S,
    window: &[Bar],
    params: &ParamSet,
) -> Result<Signal, StrategyError> {
    let Some(last) = window.len().checked_sub(1) else {
        return Ok(Signal::Flat);
    };
    let values = precompute(window, &strategy.indicators(params)?);
    strategy.evaluate(window, &values.view(last), params)
}

/// Map a parameter lookup failure inside `generate_signal` to a strategy error.
pub(crate) fn param_error(strategy: &str) -> impl Fn(ConfigError) -> StrategyError + '_ {
    move |e| StrategyError::new(strategy, e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_weights() {
        assert_eq!(Signal::Long.target_weight(), Some(1.0));
        assert_eq!(Signal::Flat.target_weight(), Some(0.0));
        assert_eq!(Signal::Short.target_weight(), Some(-1.0));
        assert_eq!(Signal::Target(0.25).target_weight(), Some(0.25));
        assert_eq!(Signal::Hold.target_weight(), None);
        assert!(Signal::Short.is_discrete());
        assert!(!Signal::Target(1.0).is_discrete());
    }

    #[test]
    fn resolve_params_applies_cross_constraints() {
        let strategy = MaCrossover;
        let err = strategy
            .resolve_params(&ParamSet::new().with("fast", 40).with("slow", 30))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Constraint(_)));

        let ok = strategy.resolve_params(&ParamSet::new()).unwrap();
        assert_eq!(ok.get_int("fast").unwrap(), 10);
        assert_eq!(ok.get_choice("ma_type").unwrap(), "sma");
    }
}
