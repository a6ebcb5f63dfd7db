//! Shared fixtures for runner integration tests.
#![allow(dead_code)]

use chrono::NaiveDate;
use stratlab_core::{Bar, ParamSchema, ParamSet, ParamSpec, Signal, Strategy, StrategyError};

pub fn bars_from_closes(closes: &[f64]) -> Vec<Bar> {
    let base = NaiveDate::from_ymd_opt(2022, 1, 3)
        .unwrap()
        .and_hms_opt(16, 0, 0)
        .unwrap();
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open = if i == 0 { close } else { closes[i - 1] };
            Bar {
                timestamp: base + chrono::Duration::days(i as i64),
                open,
                high: open.max(close) + 0.5,
                low: open.min(close) - 0.5,
                close,
                volume: 5_000.0,
            }
        })
        .collect()
}

pub fn rising(n: usize) -> Vec<Bar> {
    let closes: Vec<f64> = (0..n).map(|i| 100.0 + 0.3 * i as f64).collect();
    bars_from_closes(&closes)
}

pub fn wave(n: usize) -> Vec<Bar> {
    let closes: Vec<f64> = (0..n)
        .map(|i| 100.0 + (i as f64 / 9.0).sin() * 12.0 + i as f64 * 0.02)
        .collect();
    bars_from_closes(&closes)
}

/// `mode` 1 returns an error, `mode` 2 panics, anything else goes long.
pub struct Fragile;

impl Strategy for Fragile {
    fn name(&self) -> &str {
        "fragile"
    }

    fn schema(&self) -> ParamSchema {
        ParamSchema::new(vec![ParamSpec::int("mode", 0, 3, 1, 0)])
    }

    fn generate_signal(&self, _window: &[Bar], params: &ParamSet) -> Result<Signal, StrategyError> {
        let mode = params
            .get_int("mode")
            .map_err(|e| StrategyError::new("fragile", e.to_string()))?;
        match mode {
            1 => Err(StrategyError::new("fragile", "mode 1 always fails")),
            2 => panic!("mode 2 panics"),
            _ => Ok(Signal::Long),
        }
    }
}

/// Never trades; every candidate scores the same.
pub struct Idle;

impl Strategy for Idle {
    fn name(&self) -> &str {
        "idle"
    }

    fn schema(&self) -> ParamSchema {
        ParamSchema::new(vec![ParamSpec::int("a", 0, 2, 1, 2)])
    }

    fn generate_signal(&self, _window: &[Bar], _params: &ParamSet) -> Result<Signal, StrategyError> {
        Ok(Signal::Flat)
    }
}

/// Goes long until a close above `limit` appears, then errors.
pub struct Cliff {
    pub limit: f64,
}

impl Strategy for Cliff {
    fn name(&self) -> &str {
        "cliff"
    }

    fn schema(&self) -> ParamSchema {
        ParamSchema::default()
    }

    fn generate_signal(&self, window: &[Bar], _params: &ParamSet) -> Result<Signal, StrategyError> {
        match window.last() {
            Some(bar) if bar.close > self.limit => {
                Err(StrategyError::new("cliff", "price above limit"))
            }
            _ => Ok(Signal::Long),
        }
    }
}
