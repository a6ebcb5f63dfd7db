//! Equity curve — one (timestamp, equity) point per processed bar plus the initial state.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: NaiveDateTime,
    pub equity: f64,
}

/// Append-only equity curve.
///
/// The first point is the initial state (starting cash, stamped with the
/// first traded bar's timestamp); every later point is the mark at a bar close.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EquityCurve {
    points: Vec<EquityPoint>,
}

impl EquityCurve {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            points: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, timestamp: NaiveDateTime, equity: f64) {
        self.points.push(EquityPoint { timestamp, equity });
    }

    pub fn points(&self) -> &[EquityPoint] {
        &self.points
    }

    /// Equity values only, in order.
    pub fn values(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.equity).collect()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first(&self) -> Option<&EquityPoint> {
        self.points.first()
    }

    pub fn last(&self) -> Option<&EquityPoint> {
        self.points.last()
    }
}

impl FromIterator<EquityPoint> for EquityCurve {
    fn from_iter<I: IntoIterator<Item = EquityPoint>>(iter: I) -> Self {
        Self {
            points: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn push_and_values() {
        let t0 = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let mut curve = EquityCurve::with_capacity(2);
        curve.push(t0, 100.0);
        curve.push(t0 + chrono::Duration::days(1), 105.0);
        assert_eq!(curve.len(), 2);
        assert_eq!(curve.values(), vec![100.0, 105.0]);
        assert_eq!(curve.last().map(|p| p.equity), Some(105.0));
    }

    #[test]
    fn serializes_as_plain_array() {
        let curve = EquityCurve::default();
        assert_eq!(serde_json::to_string(&curve).unwrap(), "[]");
    }
}
