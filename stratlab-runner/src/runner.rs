//! Backtest runner — wires together simulation and metrics.
//!
//! Two entry points:
//! - `run_backtest()`: trade every bar.
//! - `run_backtest_from()`: trade `bars[start..]` with earlier bars as history.
//!   Used for walk-forward out-of-sample segments.

use serde::{Deserialize, Serialize};

use stratlab_core::{
    simulate_from, Bar, ConfigError, EquityCurve, ParamSet, PortfolioState, SimConfig, SimError,
    Simulation, Strategy, Trade,
};

use crate::metrics::{degenerate_metrics, DegenerateMetric, Metrics};

/// Current schema version for persisted results.
pub const SCHEMA_VERSION: u32 = 1;

/// Complete result of a single backtest run. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub strategy: String,
    /// Fully resolved parameters.
    pub params: ParamSet,
    pub equity_curve: EquityCurve,
    pub trades: Vec<Trade>,
    pub metrics: Metrics,
    #[serde(default)]
    pub degenerate: Vec<DegenerateMetric>,
    pub final_state: PortfolioState,
    pub config: SimConfig,
    pub bars_per_year: f64,
    #[serde(default)]
    pub rejected_signals: usize,
    #[serde(default)]
    pub unfilled_signals: usize,
    #[serde(default)]
    pub total_commission: f64,
    #[serde(default)]
    pub total_slippage: f64,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

impl RunResult {
    /// Attach metrics to a finished simulation.
    pub fn from_simulation(
        strategy: &str,
        sim: Simulation,
        config: &SimConfig,
        bars_per_year: f64,
    ) -> Self {
        let equity = sim.equity_curve.values();
        let metrics = Metrics::compute(&equity, &sim.trades, bars_per_year);
        let degenerate = degenerate_metrics(&equity, &sim.trades);
        Self {
            schema_version: SCHEMA_VERSION,
            strategy: strategy.to_string(),
            params: sim.params,
            equity_curve: sim.equity_curve,
            trades: sim.trades,
            metrics,
            degenerate,
            final_state: sim.final_state,
            config: *config,
            bars_per_year,
            rejected_signals: sim.rejected_signals,
            unfilled_signals: sim.unfilled_signals,
            total_commission: sim.total_commission,
            total_slippage: sim.total_slippage,
        }
    }

    pub fn final_equity(&self) -> f64 {
        self.equity_curve
            .last()
            .map_or(self.config.starting_cash, |p| p.equity)
    }
}

pub(crate) fn check_bars_per_year(bars_per_year: f64) -> Result<(), ConfigError> {
    if bars_per_year.is_finite() && bars_per_year > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidBarsPerYear(bars_per_year))
    }
}

/// Simulate `strategy` over every bar and compute metrics.
pub fn run_backtest(
    bars: &[Bar],
    strategy: &dyn Strategy,
    params: &ParamSet,
    config: &SimConfig,
    bars_per_year: f64,
) -> Result<RunResult, SimError> {
    run_backtest_from(bars, 0, strategy, params, config, bars_per_year)
}

/// Simulate trading `bars[start..]`; `bars[..start]` is strategy history only.
pub fn run_backtest_from(
    bars: &[Bar],
    start: usize,
    strategy: &dyn Strategy,
    params: &ParamSet,
    config: &SimConfig,
    bars_per_year: f64,
) -> Result<RunResult, SimError> {
    check_bars_per_year(bars_per_year)?;
    let sim = simulate_from(bars, start, strategy, params, config)?;
    Ok(RunResult::from_simulation(
        strategy.name(),
        sim,
        config,
        bars_per_year,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use stratlab_core::strategy::{BuyAndHold, MaCrossover};

    fn rising_bars(n: usize) -> Vec<Bar> {
        let base = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        (0..n)
            .map(|i| {
                let close = 100.0 + i as f64;
                Bar {
                    timestamp: base + chrono::Duration::days(i as i64),
                    open: close - 0.5,
                    high: close + 0.5,
                    low: close - 1.0,
                    close,
                    volume: 1_000.0,
                }
            })
            .collect()
    }

    #[test]
    fn run_attaches_metrics() {
        let bars = rising_bars(60);
        let config = SimConfig::frictionless(10_000.0);
        let result = run_backtest(&bars, &BuyAndHold, &ParamSet::new(), &config, 252.0).unwrap();
        assert_eq!(result.strategy, "buy_and_hold");
        assert_eq!(result.equity_curve.len(), bars.len() + 1);
        assert_eq!(result.equity_curve.first().unwrap().equity, 10_000.0);
        assert!(result.metrics.total_return > 0.0);
        assert_eq!(result.metrics.max_drawdown, 0.0);
        assert!(result.degenerate.contains(&DegenerateMetric::NoTrades));
        assert_eq!(result.schema_version, SCHEMA_VERSION);
    }

    #[test]
    fn run_fills_default_params() {
        let bars = rising_bars(80);
        let result = run_backtest(
            &bars,
            &MaCrossover,
            &ParamSet::new().with("fast", 5),
            &SimConfig::default(),
            252.0,
        )
        .unwrap();
        assert_eq!(result.params.get_int("fast").unwrap(), 5);
        assert_eq!(result.params.get_int("slow").unwrap(), 50);
    }

    #[test]
    fn bad_bars_per_year_rejected() {
        let bars = rising_bars(10);
        let err = run_backtest(&bars, &BuyAndHold, &ParamSet::new(), &SimConfig::default(), 0.0)
            .unwrap_err();
        assert!(matches!(
            err,
            SimError::InvalidConfig(ConfigError::InvalidBarsPerYear(_))
        ));
    }

    #[test]
    fn json_round_trip_preserves_result() {
        let bars = rising_bars(30);
        let result = run_backtest(&bars, &BuyAndHold, &ParamSet::new(), &SimConfig::default(), 252.0)
            .unwrap();
        let json = serde_json::to_string(&result).unwrap();
        let back: RunResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back.metrics, result.metrics);
        assert_eq!(back.params, result.params);
        assert_eq!(back.equity_curve.len(), result.equity_curve.len());
    }
}
