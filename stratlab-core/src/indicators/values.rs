//! Precomputed indicator series and the per-bar view strategies read them through.
//!
//! The simulator computes every series a strategy asks for once, before the
//! bar loop. At bar t the strategy gets an `IndicatorView` that stops at t, so
//! values past the decision bar are unreachable rather than merely unused.

use std::collections::HashMap;

use super::Indicator;
use crate::domain::Bar;

/// Named indicator series, each as long as the bar series it was computed on.
#[derive(Debug, Clone, Default)]
pub struct IndicatorValues {
    series: HashMap<String, Vec<f64>>,
}

impl IndicatorValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, values: Vec<f64>) {
        self.series.insert(name.into(), values);
    }

    /// Raw value at `bar_index`, NaN included.
    pub fn get(&self, name: &str, bar_index: usize) -> Option<f64> {
        self.series
            .get(name)
            .and_then(|v| v.get(bar_index).copied())
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Read-only view ending at `index`.
    pub fn view(&self, index: usize) -> IndicatorView<'_> {
        IndicatorView {
            values: self,
            index,
        }
    }
}

/// Compute each indicator over the full bar series.
///
/// Indicators are causal, so the value at t equals what `compute(&bars[..=t])`
/// would give.
pub fn precompute(bars: &[Bar], indicators: &[Box<dyn Indicator>]) -> IndicatorValues {
    let mut values = IndicatorValues::new();
    for indicator in indicators {
        let series = indicator.compute(bars);
        debug_assert_eq!(series.len(), bars.len(), "{}", indicator.name());
        values.insert(indicator.name(), series);
    }
    values
}

/// Indicator values truncated at one bar.
#[derive(Debug, Clone, Copy)]
pub struct IndicatorView<'a> {
    values: &'a IndicatorValues,
    index: usize,
}

impl IndicatorView<'_> {
    /// Last bar visible through this view.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Value at bar `i`; `None` past the view, during warmup, or for an unknown name.
    pub fn get(&self, name: &str, i: usize) -> Option<f64> {
        if i > self.index {
            return None;
        }
        self.values.get(name, i).filter(|v| !v.is_nan())
    }

    /// Value at the view's last bar.
    pub fn latest(&self, name: &str) -> Option<f64> {
        self.get(name, self.index)
    }
}
