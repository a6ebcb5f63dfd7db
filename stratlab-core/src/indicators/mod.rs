//! Causal indicators used by the built-in strategies.
//!
//! Indicators are pure functions: bar history in, numeric series out. The
//! output at index t depends only on bars `0..=t`, so a series computed once
//! over the whole history and read at t is exactly what a live run would have
//! seen at t.
//!
//! Void bars (NaN close) never enter a recursive indicator: EMA and RSI skip
//! them and carry the previous value forward.

pub mod ema;
pub mod roc;
pub mod rsi;
pub mod sma;
pub mod values;

pub use ema::{ema_of_series, Ema};
pub use roc::Roc;
pub use rsi::Rsi;
pub use sma::Sma;
pub use values::{precompute, IndicatorValues, IndicatorView};

use crate::domain::Bar;

/// A causal indicator over close prices.
///
/// # Look-ahead contamination guard
/// No value at bar t may depend on bar t+1 or later. Every indicator must pass
/// the truncated-vs-full series test.
pub trait Indicator: Send + Sync {
    /// Human-readable name (e.g., "sma_20").
    fn name(&self) -> &str;

    /// Number of bars before the first valid output.
    fn lookback(&self) -> usize;

    /// Full series, same length as `bars`. Warmup values are `f64::NAN`.
    fn compute(&self, bars: &[Bar]) -> Vec<f64>;

    /// Value at the last bar of `bars`, `None` during warmup or on NaN output.
    ///
    /// The default computes the whole series; prefer `precompute` when
    /// evaluating bar by bar.
    fn latest(&self, bars: &[Bar]) -> Option<f64> {
        self.compute(bars).last().copied().filter(|v| !v.is_nan())
    }
}

/// Create synthetic bars from close prices for testing.
///
/// open = previous close (or close for the first bar), high/low one unit
/// around the body, one bar per calendar day from 2024-01-02.
#[cfg(test)]
pub fn make_bars(closes: &[f64]) -> Vec<Bar> {
    let base = chrono::NaiveDate::from_ymd_opt(2024, 1, 2)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap();
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open = if i == 0 { close } else { closes[i - 1] };
            Bar {
                timestamp: base + chrono::Duration::days(i as i64),
                open,
                high: open.max(close) + 1.0,
                low: open.min(close) - 1.0,
                close,
                volume: 1000.0,
            }
        })
        .collect()
}

#[cfg(test)]
pub fn assert_approx(actual: f64, expected: f64, epsilon: f64) {
    assert!(
        (actual - expected).abs() < epsilon,
        "assert_approx failed: actual={actual}, expected={expected}, diff={}, epsilon={epsilon}",
        (actual - expected).abs()
    );
}

#[cfg(test)]
pub const DEFAULT_EPSILON: f64 = 1e-10;

#[cfg(test)]
mod tests {
    use super::*;

    fn all() -> Vec<Box<dyn Indicator>> {
        vec![
            Box::new(Sma::new(5)),
            Box::new(Ema::new(5)),
            Box::new(Rsi::new(5)),
            Box::new(Roc::new(5)),
        ]
    }

    fn wavy(n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| 100.0 + (i as f64 * 0.7).sin() * 8.0 + i as f64 * 0.1)
            .collect()
    }

    #[test]
    fn truncated_series_matches_full_series_prefix() {
        let bars = make_bars(&wavy(60));
        for ind in all() {
            let full = ind.compute(&bars);
            for t in [10, 25, 59] {
                let truncated = ind.compute(&bars[..=t]);
                for i in 0..=t {
                    let (a, b) = (truncated[i], full[i]);
                    assert!(
                        (a.is_nan() && b.is_nan()) || (a - b).abs() < 1e-9,
                        "{} differs at {i} when truncated to {t}: {a} vs {b}",
                        ind.name()
                    );
                }
            }
        }
    }

    #[test]
    fn latest_matches_last_computed_value() {
        let bars = make_bars(&wavy(40));
        for ind in all() {
            for t in 0..bars.len() {
                let window = &bars[..=t];
                let expected = ind.compute(window)[t];
                match ind.latest(window) {
                    Some(v) => assert_approx(v, expected, 1e-9),
                    None => assert!(expected.is_nan(), "{} at {t}", ind.name()),
                }
            }
        }
    }

    #[test]
    fn warmup_is_nan() {
        let bars = make_bars(&wavy(30));
        for ind in all() {
            let out = ind.compute(&bars);
            assert_eq!(out.len(), bars.len());
            for (i, v) in out.iter().enumerate().take(ind.lookback()) {
                assert!(v.is_nan(), "{} expected warmup NaN at {i}", ind.name());
            }
            assert!(!out[ind.lookback()].is_nan(), "{}", ind.name());
        }
    }
}
