//! Time-series momentum on the rate of change.

use super::{param_error, Signal, Strategy};
use crate::domain::Bar;
use crate::error::StrategyError;
use crate::indicators::{Indicator, Roc};
use crate::params::{ParamSchema, ParamSet, ParamSpec};

/// ROC over `lookback` above `+threshold` → LONG; below `-threshold` → SHORT
/// when `allow_short = yes`, FLAT otherwise; in between → FLAT.
#[derive(Debug, Clone, Copy, Default)]
pub struct Momentum;

impl Strategy for Momentum {
    fn name(&self) -> &str {
        "momentum"
    }

    fn description(&self) -> &str {
        "follow the sign of the trailing rate of change"
    }

    fn schema(&self) -> ParamSchema {
        ParamSchema::new(vec![
            ParamSpec::int("lookback", 5, 120, 5, 20),
            ParamSpec::float("threshold", 0.0, 0.1, 0.01, 0.0),
            ParamSpec::choice("allow_short", &["no", "yes"], "no"),
        ])
    }

    fn generate_signal(&self, window: &[Bar], params: &ParamSet) -> Result<Signal, StrategyError> {
        let err = param_error(self.name());
        let lookback = params.get_usize("lookback").map_err(&err)?;
        let threshold = params.get_float("threshold").map_err(&err)?;
        let allow_short = params.get_choice("allow_short").map_err(&err)? == "yes";

        let Some(roc) = Roc::new(lookback).latest(window) else {
            return Ok(Signal::Flat);
        };
        Ok(if roc > threshold {
            Signal::Long
        } else if roc < -threshold && allow_short {
            Signal::Short
        } else {
            Signal::Flat
        })
    }
}
