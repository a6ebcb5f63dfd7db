//! Exponential Moving Average (EMA) of closes.
//!
//! EMA[t] = alpha * close[t] + (1 - alpha) * EMA[t-1], alpha = 2 / (period + 1),
//! seeded with the SMA of the first `period` closes. Lookback: period - 1.
//! Void bars are skipped and repeat the previous value.

use super::Indicator;
use crate::domain::Bar;

#[derive(Debug, Clone)]
pub struct Ema {
    period: usize,
    name: String,
}

impl Ema {
    /// A period of 0 is treated as 1.
    pub fn new(period: usize) -> Self {
        let period = period.max(1);
        Self {
            period,
            name: format!("ema_{period}"),
        }
    }
}

impl Indicator for Ema {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        self.period - 1
    }

    fn compute(&self, bars: &[Bar]) -> Vec<f64> {
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        ema_of_series(&closes, self.period)
    }
}

/// EMA of an arbitrary series.
///
/// NaN inputs are skipped: the seed is the mean of the first `period` non-NaN
/// values, and a NaN after the seed repeats the previous output.
pub fn ema_of_series(values: &[f64], period: usize) -> Vec<f64> {
    let mut result = vec![f64::NAN; values.len()];
    if period == 0 {
        return result;
    }

    let alpha = 2.0 / (period as f64 + 1.0);
    let mut seed_sum = 0.0;
    let mut seen = 0usize;
    let mut prev = f64::NAN;
    for (slot, &v) in result.iter_mut().zip(values) {
        if !v.is_nan() {
            if seen < period {
                seed_sum += v;
                seen += 1;
                if seen == period {
                    prev = seed_sum / period as f64;
                }
            } else {
                prev = alpha * v + (1.0 - alpha) * prev;
            }
        }
        *slot = prev;
    }

    result
}
