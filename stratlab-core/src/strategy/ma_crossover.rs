//! Moving average crossover — long while the fast MA is above the slow MA.

use std::str::FromStr;

use super::{evaluate_window, param_error, Signal, Strategy};
use crate::domain::Bar;
use crate::error::{ConfigError, StrategyError};
use crate::indicators::{Ema, Indicator, IndicatorView, Sma};
use crate::params::{ParamSchema, ParamSet, ParamSpec};

/// Moving average type selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaType {
    Sma,
    Ema,
}

impl MaType {
    pub fn indicator(&self, period: usize) -> Box<dyn Indicator> {
        match self {
            MaType::Sma => Box::new(Sma::new(period)),
            MaType::Ema => Box::new(Ema::new(period)),
        }
    }

    /// Same as `indicator(period).name()`.
    fn series_name(&self, period: usize) -> String {
        let period = period.max(1);
        match self {
            MaType::Sma => format!("sma_{period}"),
            MaType::Ema => format!("ema_{period}"),
        }
    }
}

impl FromStr for MaType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sma" => Ok(MaType::Sma),
            "ema" => Ok(MaType::Ema),
            other => Err(format!("unknown ma_type '{other}'")),
        }
    }
}

/// LONG while fast MA > slow MA, FLAT otherwise (including warmup).
///
/// Params: `fast` (int), `slow` (int), `ma_type` (sma | ema). Requires `fast < slow`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaCrossover;

impl Strategy for MaCrossover {
    fn name(&self) -> &str {
        "ma_crossover"
    }

    fn description(&self) -> &str {
        "long while the fast moving average is above the slow one"
    }

    fn schema(&self) -> ParamSchema {
        ParamSchema::new(vec![
            ParamSpec::int("fast", 2, 50, 1, 10),
            ParamSpec::int("slow", 10, 200, 10, 50),
            ParamSpec::choice("ma_type", &["sma", "ema"], "sma"),
        ])
    }

    fn validate(&self, params: &ParamSet) -> Result<(), ConfigError> {
        let fast = params.get_int("fast")?;
        let slow = params.get_int("slow")?;
        if fast >= slow {
            return Err(ConfigError::Constraint(format!(
                "fast ({fast}) must be less than slow ({slow})"
            )));
        }
        Ok(())
    }

    fn generate_signal(&self, window: &[Bar], params: &ParamSet) -> Result<Signal, StrategyError> {
        evaluate_window(self, window, params)
    }

    fn indicators(&self, params: &ParamSet) -> Result<Vec<Box<dyn Indicator>>, StrategyError> {
        let (fast, slow, ma_type) = self.settings(params)?;
        Ok(vec![ma_type.indicator(fast), ma_type.indicator(slow)])
    }

    fn evaluate(
        &self,
        window: &[Bar],
        indicators: &IndicatorView<'_>,
        params: &ParamSet,
    ) -> Result<Signal, StrategyError> {
        let (fast, slow, ma_type) = self.settings(params)?;
        if window.len() < slow {
            return Ok(Signal::Flat);
        }
        let fast_ma = indicators.latest(&ma_type.series_name(fast));
        let slow_ma = indicators.latest(&ma_type.series_name(slow));
        match (fast_ma, slow_ma) {
            (Some(f), Some(s)) if f > s => Ok(Signal::Long),
            _ => Ok(Signal::Flat),
        }
    }
}

impl MaCrossover {
    fn settings(&self, params: &ParamSet) -> Result<(usize, usize, MaType), StrategyError> {
        let err = param_error(self.name());
        let fast = params.get_usize("fast").map_err(&err)?;
        let slow = params.get_usize("slow").map_err(&err)?;
        let ma_type: MaType = params
            .get_choice("ma_type")
            .map_err(&err)?
            .parse()
            .map_err(|e: String| StrategyError::new(self.name(), e))?;
        Ok((fast, slow, ma_type))
    }
}
