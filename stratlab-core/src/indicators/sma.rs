//! Simple Moving Average (SMA) of closes.
//!
//! Lookback: period - 1 (first valid value at index period-1).

use super::Indicator;
use crate::domain::Bar;

#[derive(Debug, Clone)]
pub struct Sma {
    period: usize,
    name: String,
}

impl Sma {
    /// A period of 0 is treated as 1.
    pub fn new(period: usize) -> Self {
        let period = period.max(1);
        Self {
            period,
            name: format!("sma_{period}"),
        }
    }

    pub fn period(&self) -> usize {
        self.period
    }
}

impl Indicator for Sma {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        self.period - 1
    }

    fn compute(&self, bars: &[Bar]) -> Vec<f64> {
        let n = bars.len();
        let mut result = vec![f64::NAN; n];
        if n < self.period {
            return result;
        }

        let mut sum: f64 = bars[..self.period].iter().map(|b| b.close).sum();
        result[self.period - 1] = sum / self.period as f64;

        for i in self.period..n {
            let leaving = bars[i - self.period].close;
            let entering = bars[i].close;
            if leaving.is_nan() || entering.is_nan() || sum.is_nan() {
                // A NaN poisons the running sum; rescan the window.
                sum = bars[i + 1 - self.period..=i].iter().map(|b| b.close).sum();
            } else {
                sum += entering - leaving;
            }
            result[i] = sum / self.period as f64;
        }

        result
    }

    fn latest(&self, bars: &[Bar]) -> Option<f64> {
        if bars.len() < self.period {
            return None;
        }
        let sum: f64 = bars[bars.len() - self.period..]
            .iter()
            .map(|b| b.close)
            .sum();
        Some(sum / self.period as f64).filter(|v| !v.is_nan())
    }
}
