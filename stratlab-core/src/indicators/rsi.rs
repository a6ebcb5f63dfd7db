//! Relative Strength Index (RSI) with Wilder smoothing.
//!
//! RSI = 100 - 100 / (1 + avg_gain / avg_loss). Lookback: period.
//! No movement gives 50; only gains gives 100; only losses gives 0.
//! Void bars are skipped: the next change is measured from the last valid
//! close, and the void bar repeats the previous value.

use super::Indicator;
use crate::domain::Bar;

#[derive(Debug, Clone)]
pub struct Rsi {
    period: usize,
    name: String,
}

impl Rsi {
    /// A period of 0 is treated as 1.
    pub fn new(period: usize) -> Self {
        let period = period.max(1);
        Self {
            period,
            name: format!("rsi_{period}"),
        }
    }
}

impl Indicator for Rsi {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        self.period
    }

    fn compute(&self, bars: &[Bar]) -> Vec<f64> {
        let mut result = vec![f64::NAN; bars.len()];
        let period = self.period as f64;
        let alpha = 1.0 / period;

        let mut last_close: Option<f64> = None;
        let mut changes = 0usize;
        let (mut avg_gain, mut avg_loss) = (0.0, 0.0);
        let mut current = f64::NAN;

        for (slot, bar) in result.iter_mut().zip(bars) {
            let close = bar.close;
            if !close.is_nan() {
                if let Some(prev) = last_close {
                    let ch = close - prev;
                    changes += 1;
                    if changes <= self.period {
                        // Seed: plain average of the first `period` changes.
                        avg_gain += ch.max(0.0) / period;
                        avg_loss += (-ch).max(0.0) / period;
                        if changes == self.period {
                            current = rsi_value(avg_gain, avg_loss);
                        }
                    } else {
                        avg_gain = alpha * ch.max(0.0) + (1.0 - alpha) * avg_gain;
                        avg_loss = alpha * (-ch).max(0.0) + (1.0 - alpha) * avg_loss;
                        current = rsi_value(avg_gain, avg_loss);
                    }
                }
                last_close = Some(close);
            }
            *slot = current;
        }

        result
    }
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 && avg_gain == 0.0 {
        50.0
    } else if avg_loss == 0.0 {
        100.0
    } else if avg_gain == 0.0 {
        0.0
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{assert_approx, make_bars};

    #[test]
    fn rsi_all_gains() {
        let bars = make_bars(&[100.0, 101.0, 102.0, 103.0, 104.0, 105.0]);
        assert_approx(Rsi::new(3).compute(&bars)[3], 100.0, 1e-6);
    }

    #[test]
    fn rsi_all_losses() {
        let bars = make_bars(&[105.0, 104.0, 103.0, 102.0, 101.0, 100.0]);
        assert_approx(Rsi::new(3).compute(&bars)[3], 0.0, 1e-6);
    }

    #[test]
    fn rsi_flat_is_fifty() {
        let bars = make_bars(&[100.0; 8]);
        assert_approx(Rsi::new(3).latest(&bars).unwrap(), 50.0, 1e-9);
    }

    #[test]
    fn rsi_seed_value() {
        // changes +0.34, -0.25, -0.48 → 100 - 100 / (1 + 0.34 / 0.73)
        let bars = make_bars(&[44.0, 44.34, 44.09, 43.61, 44.33]);
        let result = Rsi::new(3).compute(&bars);
        assert!(result[..3].iter().all(|v| v.is_nan()));
        assert_approx(result[3], 100.0 - 100.0 / (1.0 + 0.34 / 0.73), 1e-9);
    }

    #[test]
    fn rsi_bounds() {
        let bars = make_bars(&[100.0, 105.0, 98.0, 110.0, 95.0, 115.0, 90.0, 120.0]);
        for (i, &v) in Rsi::new(3).compute(&bars).iter().enumerate() {
            if !v.is_nan() {
                assert!((0.0..=100.0).contains(&v), "RSI out of bounds at bar {i}: {v}");
            }
        }
    }

    #[test]
    fn rsi_void_bar_in_seed_delays_the_seed() {
        let mut bars = make_bars(&[100.0, 101.0, 0.0, 102.0, 103.0, 104.0]);
        bars[2].close = f64::NAN;
        let result = Rsi::new(3).compute(&bars);
        assert!(result[..4].iter().all(|v| v.is_nan()));
        assert_approx(result[4], 100.0, 1e-9);
    }

    #[test]
    fn rsi_void_bar_after_seed_carries_value_forward() {
        let mut bars = make_bars(&[100.0, 101.0, 102.0, 103.0, 0.0, 102.0]);
        bars[4].close = f64::NAN;
        let result = Rsi::new(3).compute(&bars);
        assert_approx(result[3], 100.0, 1e-9);
        assert_approx(result[4], 100.0, 1e-9);
        // change measured from 103: gain 2/3, loss 1/3
        assert_approx(result[5], 100.0 - 100.0 / 3.0, 1e-9);
    }
}
