//! Rate of Change (ROC) as a fraction: close[t] / close[t-period] - 1.
//!
//! Lookback: period.

use super::Indicator;
use crate::domain::Bar;

#[derive(Debug, Clone)]
pub struct Roc {
    period: usize,
    name: String,
}

impl Roc {
    /// A period of 0 is treated as 1.
    pub fn new(period: usize) -> Self {
        let period = period.max(1);
        Self {
            period,
            name: format!("roc_{period}"),
        }
    }

    fn at(&self, bars: &[Bar], i: usize) -> f64 {
        let prev = bars[i - self.period].close;
        let curr = bars[i].close;
        if prev.is_nan() || curr.is_nan() || prev == 0.0 {
            f64::NAN
        } else {
            curr / prev - 1.0
        }
    }
}

impl Indicator for Roc {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        self.period
    }

    fn compute(&self, bars: &[Bar]) -> Vec<f64> {
        let mut result = vec![f64::NAN; bars.len()];
        for (i, slot) in result.iter_mut().enumerate().skip(self.period) {
            *slot = self.at(bars, i);
        }
        result
    }

    fn latest(&self, bars: &[Bar]) -> Option<f64> {
        let n = bars.len();
        if n <= self.period {
            return None;
        }
        Some(self.at(bars, n - 1)).filter(|v| !v.is_nan())
    }
}
