//! RSI threshold — mean reversion with hysteresis.

use super::{evaluate_window, param_error, Signal, Strategy};
use crate::domain::Bar;
use crate::error::{ConfigError, StrategyError};
use crate::indicators::{Indicator, IndicatorView, Rsi};
use crate::params::{ParamSchema, ParamSet, ParamSpec};

/// LONG when RSI < `lower`, FLAT when RSI > `upper`, HOLD in between.
///
/// FLAT during warmup. Requires `lower < upper`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RsiThreshold;

impl Strategy for RsiThreshold {
    fn name(&self) -> &str {
        "rsi_threshold"
    }

    fn description(&self) -> &str {
        "buy oversold RSI, exit when overbought"
    }

    fn schema(&self) -> ParamSchema {
        ParamSchema::new(vec![
            ParamSpec::int("period", 2, 30, 2, 14),
            ParamSpec::float("lower", 10.0, 45.0, 5.0, 30.0),
            ParamSpec::float("upper", 55.0, 90.0, 5.0, 70.0),
        ])
    }

    fn validate(&self, params: &ParamSet) -> Result<(), ConfigError> {
        let lower = params.get_float("lower")?;
        let upper = params.get_float("upper")?;
        if lower >= upper {
            return Err(ConfigError::Constraint(format!(
                "lower ({lower}) must be less than upper ({upper})"
            )));
        }
        Ok(())
    }

    fn generate_signal(&self, window: &[Bar], params: &ParamSet) -> Result<Signal, StrategyError> {
        evaluate_window(self, window, params)
    }

    fn indicators(&self, params: &ParamSet) -> Result<Vec<Box<dyn Indicator>>, StrategyError> {
        let period = params.get_usize("period").map_err(param_error(self.name()))?;
        Ok(vec![Box::new(Rsi::new(period))])
    }

    fn evaluate(
        &self,
        _window: &[Bar],
        indicators: &IndicatorView<'_>,
        params: &ParamSet,
    ) -> Result<Signal, StrategyError> {
        let err = param_error(self.name());
        let period = params.get_usize("period").map_err(&err)?;
        let lower = params.get_float("lower").map_err(&err)?;
        let upper = params.get_float("upper").map_err(&err)?;

        let Some(rsi) = indicators.latest(&format!("rsi_{}", period.max(1))) else {
            return Ok(Signal::Flat);
        };
        Ok(if rsi < lower {
            Signal::Long
        } else if rsi > upper {
            Signal::Flat
        } else {
            Signal::Hold
        })
    }
}
