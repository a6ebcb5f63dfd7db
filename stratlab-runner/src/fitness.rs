//! Target metric — configurable selector for ranking search candidates.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::metrics::Metrics;

/// Which metric to optimize and sort by.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetMetric {
    #[default]
    #[serde(alias = "sharpe_ratio")]
    Sharpe,
    #[serde(alias = "sortino_ratio")]
    Sortino,
    #[serde(alias = "calmar_ratio")]
    Calmar,
    Cagr,
    TotalReturn,
    WinRate,
    ProfitFactor,
    MaxDrawdown,
}

impl TargetMetric {
    pub const ALL: [TargetMetric; 8] = [
        Self::Sharpe,
        Self::Sortino,
        Self::Calmar,
        Self::Cagr,
        Self::TotalReturn,
        Self::WinRate,
        Self::ProfitFactor,
        Self::MaxDrawdown,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Sharpe => "sharpe",
            Self::Sortino => "sortino",
            Self::Calmar => "calmar",
            Self::Cagr => "cagr",
            Self::TotalReturn => "total_return",
            Self::WinRate => "win_rate",
            Self::ProfitFactor => "profit_factor",
            Self::MaxDrawdown => "max_drawdown",
        }
    }

    /// Raw metric value as reported.
    pub fn extract(&self, metrics: &Metrics) -> f64 {
        match self {
            Self::Sharpe => metrics.sharpe_ratio,
            Self::Sortino => metrics.sortino_ratio,
            Self::Calmar => metrics.calmar_ratio,
            Self::Cagr => metrics.cagr,
            Self::TotalReturn => metrics.total_return,
            Self::WinRate => metrics.win_rate,
            Self::ProfitFactor => metrics.profit_factor,
            Self::MaxDrawdown => metrics.max_drawdown,
        }
    }

    /// Ranking score: higher is always better.
    ///
    /// Drawdown is a positive fraction, so it scores as its negation.
    pub fn score(&self, metrics: &Metrics) -> f64 {
        match self {
            Self::MaxDrawdown => -metrics.max_drawdown,
            _ => self.extract(metrics),
        }
    }
}

impl fmt::Display for TargetMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TargetMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sharpe" | "sharpe_ratio" => Ok(Self::Sharpe),
            "sortino" | "sortino_ratio" => Ok(Self::Sortino),
            "calmar" | "calmar_ratio" => Ok(Self::Calmar),
            "cagr" => Ok(Self::Cagr),
            "total_return" => Ok(Self::TotalReturn),
            "win_rate" => Ok(Self::WinRate),
            "profit_factor" => Ok(Self::ProfitFactor),
            "max_drawdown" => Ok(Self::MaxDrawdown),
            other => Err(format!(
                "unknown target metric '{other}' (expected one of: {})",
                Self::ALL.map(|m| m.name()).join(", ")
            )),
        }
    }
}

/// Descending order by score with NaN last.
pub fn compare_scores(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
    }
}
