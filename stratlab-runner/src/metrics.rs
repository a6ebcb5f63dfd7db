//! Performance metrics — pure functions that compute strategy statistics.
//!
//! Every metric is a pure function: equity curve and/or trade list in, scalar out.
//! Degenerate inputs never panic and never produce NaN; they fall back to the
//! sentinels listed in `DegenerateMetric`.

use serde::{Deserialize, Serialize};
use stratlab_core::Trade;

/// Default annualization factor (daily bars).
pub const DEFAULT_BARS_PER_YEAR: f64 = 252.0;

/// Standard deviations below this are treated as zero.
const STD_EPSILON: f64 = 1e-15;

/// Aggregate performance metrics for a single run.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Metrics {
    pub total_return: f64,
    pub cagr: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    /// Positive fraction in `[0, 1]` (0.15 = 15% peak-to-trough).
    pub max_drawdown: f64,
    pub calmar_ratio: f64,
    pub win_rate: f64,
    /// `f64::INFINITY` when there are winners and no losers; JSON `null` on disk.
    #[serde(with = "infinite_as_null")]
    pub profit_factor: f64,
    pub num_trades: usize,
}

impl Metrics {
    /// Compute all metrics from equity values and closed trades.
    pub fn compute(equity_curve: &[f64], trades: &[Trade], bars_per_year: f64) -> Self {
        let cagr = cagr(equity_curve, bars_per_year);
        let max_drawdown = max_drawdown(equity_curve);
        Self {
            total_return: total_return(equity_curve),
            cagr,
            sharpe_ratio: sharpe_ratio(equity_curve, bars_per_year),
            sortino_ratio: sortino_ratio(equity_curve, bars_per_year),
            max_drawdown,
            calmar_ratio: if max_drawdown > 0.0 {
                cagr / max_drawdown
            } else {
                0.0
            },
            win_rate: win_rate(trades),
            profit_factor: profit_factor(trades),
            num_trades: trades.len(),
        }
    }
}

/// `compute_metrics(equity_curve, trades, bars_per_year)`.
pub fn compute_metrics(equity_curve: &[f64], trades: &[Trade], bars_per_year: f64) -> Metrics {
    Metrics::compute(equity_curve, trades, bars_per_year)
}

/// Which sentinel a metric fell back to. Informational only, never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegenerateMetric {
    /// Zero return variance: Sharpe reported as 0.
    FlatEquity,
    /// No negative period: Sortino reported as 0.
    NoDownside,
    /// Never below a prior peak: Calmar reported as 0.
    NoDrawdown,
    /// No closed trades: win rate and profit factor reported as 0.
    NoTrades,
    /// Winners but no losers: profit factor is +infinity.
    NoLosingTrades,
}

impl DegenerateMetric {
    pub fn describe(&self) -> &'static str {
        match self {
            Self::FlatEquity => "equity never varied; Sharpe set to 0",
            Self::NoDownside => "no losing periods; Sortino set to 0",
            Self::NoDrawdown => "no drawdown; Calmar set to 0",
            Self::NoTrades => "no closed trades; win rate and profit factor set to 0",
            Self::NoLosingTrades => "no losing trades; profit factor is infinite",
        }
    }
}

/// Sentinels applied when computing metrics for these inputs.
pub fn degenerate_metrics(equity_curve: &[f64], trades: &[Trade]) -> Vec<DegenerateMetric> {
    let mut flags = Vec::new();
    let returns = period_returns(equity_curve);
    if returns.len() < 2 || std_dev(&returns) < STD_EPSILON {
        flags.push(DegenerateMetric::FlatEquity);
    }
    if !returns.iter().any(|r| *r < 0.0) {
        flags.push(DegenerateMetric::NoDownside);
    }
    if max_drawdown(equity_curve) == 0.0 {
        flags.push(DegenerateMetric::NoDrawdown);
    }
    if trades.is_empty() {
        flags.push(DegenerateMetric::NoTrades);
    } else if profit_factor(trades).is_infinite() {
        flags.push(DegenerateMetric::NoLosingTrades);
    }
    flags
}

// ─── Individual metric functions ────────────────────────────────────

/// `equity[-1] / equity[0] - 1`; 0 for fewer than two points or non-positive start.
pub fn total_return(equity_curve: &[f64]) -> f64 {
    match (equity_curve.first(), equity_curve.last()) {
        (Some(&initial), Some(&last)) if equity_curve.len() >= 2 && initial > 0.0 => {
            last / initial - 1.0
        }
        _ => 0.0,
    }
}

/// `(equity[-1] / equity[0]) ^ (bars_per_year / len(equity)) - 1`.
///
/// A non-positive end/start ratio (total loss) gives -1.
pub fn cagr(equity_curve: &[f64], bars_per_year: f64) -> f64 {
    let n = equity_curve.len();
    if n < 2 || bars_per_year <= 0.0 {
        return 0.0;
    }
    let initial = equity_curve[0];
    if initial <= 0.0 {
        return 0.0;
    }
    let ratio = equity_curve[n - 1] / initial;
    if ratio <= 0.0 {
        return -1.0;
    }
    (ratio.powf(bars_per_year / n as f64) - 1.0).min(f64::MAX)
}

/// Annualized Sharpe ratio: `mean(r) / std(r) * sqrt(bars_per_year)`.
///
/// 0 when the standard deviation is zero or there are fewer than two returns.
pub fn sharpe_ratio(equity_curve: &[f64], bars_per_year: f64) -> f64 {
    let returns = period_returns(equity_curve);
    if returns.len() < 2 {
        return 0.0;
    }
    let std = std_dev(&returns);
    if std < STD_EPSILON {
        return 0.0;
    }
    mean(&returns) / std * bars_per_year.max(0.0).sqrt()
}

/// Annualized Sortino ratio, downside deviation only in the denominator.
///
/// Downside deviation = sqrt(sum of squared negative returns / number of returns).
/// 0 when no period return is negative.
pub fn sortino_ratio(equity_curve: &[f64], bars_per_year: f64) -> f64 {
    let returns = period_returns(equity_curve);
    if returns.len() < 2 {
        return 0.0;
    }
    let downside_sq: f64 = returns.iter().filter(|r| **r < 0.0).map(|r| r * r).sum();
    if downside_sq == 0.0 {
        return 0.0;
    }
    let downside_dev = (downside_sq / returns.len() as f64).sqrt();
    if downside_dev < STD_EPSILON {
        return 0.0;
    }
    mean(&returns) / downside_dev * bars_per_year.max(0.0).sqrt()
}

/// Largest peak-to-trough decline as a positive fraction, single O(n) pass.
pub fn max_drawdown(equity_curve: &[f64]) -> f64 {
    let Some(&first) = equity_curve.first() else {
        return 0.0;
    };
    let mut peak = first;
    let mut max_dd = 0.0_f64;
    for &eq in equity_curve {
        if eq > peak {
            peak = eq;
        }
        if peak > 0.0 {
            max_dd = max_dd.max((peak - eq) / peak);
        }
    }
    max_dd.clamp(0.0, 1.0)
}

/// `cagr / max_drawdown`, 0 without drawdown.
pub fn calmar_ratio(equity_curve: &[f64], bars_per_year: f64) -> f64 {
    let dd = max_drawdown(equity_curve);
    if dd == 0.0 {
        return 0.0;
    }
    cagr(equity_curve, bars_per_year) / dd
}

/// Fraction of trades with positive PnL (0 with no trades).
pub fn win_rate(trades: &[Trade]) -> f64 {
    if trades.is_empty() {
        return 0.0;
    }
    trades.iter().filter(|t| t.is_winner()).count() as f64 / trades.len() as f64
}

/// Gross profit / gross loss.
///
/// 0 with no trades (or only break-even trades); +infinity with winners and no losers.
pub fn profit_factor(trades: &[Trade]) -> f64 {
    let gross_profit: f64 = trades.iter().filter(|t| t.pnl > 0.0).map(|t| t.pnl).sum();
    let gross_loss: f64 = trades
        .iter()
        .filter(|t| t.pnl < 0.0)
        .map(|t| t.pnl.abs())
        .sum();
    if gross_loss == 0.0 {
        return if gross_profit > 0.0 { f64::INFINITY } else { 0.0 };
    }
    gross_profit / gross_loss
}

// ─── Helpers ────────────────────────────────────────────────────────

/// `r_i = equity[i] / equity[i-1] - 1`; 0 where the previous value is not positive.
pub fn period_returns(equity_curve: &[f64]) -> Vec<f64> {
    equity_curve
        .windows(2)
        .map(|w| if w[0] > 0.0 { w[1] / w[0] - 1.0 } else { 0.0 })
        .collect()
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n - 1); 0 for fewer than two values.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    var.sqrt()
}

/// Serde adapter: infinities as `null`, `null` back as +infinity.
pub mod infinite_as_null {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else {
            serializer.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::INFINITY))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use stratlab_core::Side;

    fn trade(pnl: f64) -> Trade {
        let t = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        Trade {
            side: Side::Long,
            signal_time: t,
            entry_bar: 1,
            entry_time: t + chrono::Duration::days(1),
            entry_price: 100.0,
            exit_bar: 5,
            exit_time: t + chrono::Duration::days(5),
            exit_price: 100.0 + pnl / 10.0,
            quantity: 10.0,
            commission_paid: 0.0,
            slippage_paid: 0.0,
            pnl,
        }
    }

    #[test]
    fn total_return_basic() {
        assert!((total_return(&[100.0, 110.0, 120.0]) - 0.2).abs() < 1e-12);
        assert_eq!(total_return(&[100.0]), 0.0);
        assert_eq!(total_return(&[0.0, 10.0]), 0.0);
    }

    #[test]
    fn cagr_uses_curve_length() {
        // 253 points at 252 bars/year: exponent 252/253.
        let mut curve = vec![100.0; 253];
        curve[252] = 110.0;
        let expected = 1.1_f64.powf(252.0 / 253.0) - 1.0;
        assert!((cagr(&curve, 252.0) - expected).abs() < 1e-12);
    }

    #[test]
    fn cagr_total_loss_is_minus_one() {
        assert_eq!(cagr(&[100.0, 50.0, 0.0], 252.0), -1.0);
        assert_eq!(cagr(&[100.0, -5.0], 252.0), -1.0);
    }

    #[test]
    fn sharpe_zero_on_flat_equity() {
        assert_eq!(sharpe_ratio(&[100.0; 10], 252.0), 0.0);
        assert_eq!(sortino_ratio(&[100.0; 10], 252.0), 0.0);
    }

    #[test]
    fn sharpe_matches_hand_computation() {
        let curve = [100.0, 101.0, 100.0, 102.0];
        let r = period_returns(&curve);
        let expected = mean(&r) / std_dev(&r) * 252.0_f64.sqrt();
        assert!((sharpe_ratio(&curve, 252.0) - expected).abs() < 1e-12);
        assert!(std_dev(&r) > 0.0);
    }

    #[test]
    fn sortino_zero_without_downside() {
        assert_eq!(sortino_ratio(&[100.0, 101.0, 103.0, 104.0], 252.0), 0.0);
        assert!(sortino_ratio(&[100.0, 99.0, 103.0, 104.0], 252.0) > 0.0);
    }

    #[test]
    fn max_drawdown_is_positive_fraction() {
        let dd = max_drawdown(&[100.0, 120.0, 90.0, 130.0, 117.0]);
        assert!((dd - 0.25).abs() < 1e-12);
        assert_eq!(max_drawdown(&[100.0, 101.0, 102.0]), 0.0);
        assert_eq!(max_drawdown(&[100.0, -50.0]), 1.0);
    }

    #[test]
    fn calmar_zero_without_drawdown() {
        assert_eq!(calmar_ratio(&[100.0, 110.0], 252.0), 0.0);
        let curve = [100.0, 120.0, 90.0, 130.0];
        let expected = cagr(&curve, 252.0) / max_drawdown(&curve);
        assert!((calmar_ratio(&curve, 252.0) - expected).abs() < 1e-12);
    }

    #[test]
    fn trade_metrics() {
        let trades = [trade(100.0), trade(-50.0), trade(30.0), trade(-10.0)];
        assert_eq!(win_rate(&trades), 0.5);
        assert!((profit_factor(&trades) - 130.0 / 60.0).abs() < 1e-12);
        assert_eq!(win_rate(&[]), 0.0);
        assert_eq!(profit_factor(&[]), 0.0);
    }

    #[test]
    fn profit_factor_infinite_without_losers() {
        assert_eq!(profit_factor(&[trade(10.0), trade(5.0)]), f64::INFINITY);
        assert_eq!(profit_factor(&[trade(0.0)]), 0.0);
    }

    #[test]
    fn infinite_profit_factor_round_trips_through_null() {
        let m = Metrics {
            profit_factor: f64::INFINITY,
            num_trades: 2,
            ..Metrics::default()
        };
        let json = serde_json::to_string(&m).unwrap();
        assert!(json.contains("\"profit_factor\":null"));
        let back: Metrics = serde_json::from_str(&json).unwrap();
        assert_eq!(back.profit_factor, f64::INFINITY);

        let finite = Metrics {
            profit_factor: 1.5,
            ..Metrics::default()
        };
        let back: Metrics = serde_json::from_str(&serde_json::to_string(&finite).unwrap()).unwrap();
        assert_eq!(back.profit_factor, 1.5);
    }

    #[test]
    fn degenerate_flags() {
        let flags = degenerate_metrics(&[100.0; 5], &[]);
        assert!(flags.contains(&DegenerateMetric::FlatEquity));
        assert!(flags.contains(&DegenerateMetric::NoDownside));
        assert!(flags.contains(&DegenerateMetric::NoDrawdown));
        assert!(flags.contains(&DegenerateMetric::NoTrades));

        let flags = degenerate_metrics(&[100.0, 90.0, 95.0], &[trade(5.0)]);
        assert_eq!(flags, vec![DegenerateMetric::NoLosingTrades]);
    }

    #[test]
    fn compute_zero_cost_flat_series() {
        let m = compute_metrics(&[1_000.0; 30], &[], DEFAULT_BARS_PER_YEAR);
        assert_eq!(m.total_return, 0.0);
        assert_eq!(m.sharpe_ratio, 0.0);
        assert_eq!(m.max_drawdown, 0.0);
        assert_eq!(m.num_trades, 0);
    }
}
