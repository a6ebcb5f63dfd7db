//! Buy and hold — the benchmark every other strategy is compared against.

use super::{Signal, Strategy};
use crate::domain::Bar;
use crate::error::StrategyError;
use crate::params::{ParamSchema, ParamSet};

/// Long from the first bar, never exits.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuyAndHold;

impl Strategy for BuyAndHold {
    fn name(&self) -> &str {
        "buy_and_hold"
    }

    fn description(&self) -> &str {
        "long from the first bar to the end"
    }

    fn schema(&self) -> ParamSchema {
        ParamSchema::default()
    }

    fn generate_signal(&self, _window: &[Bar], _params: &ParamSet) -> Result<Signal, StrategyError> {
        Ok(Signal::Long)
    }
}
