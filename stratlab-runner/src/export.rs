//! Export — flat records, CSV tables, and JSON for results.
//!
//! Flat records carry only primitive fields: parameter sets become
//! `name → string` maps and timestamps ISO-8601 strings, so they load into
//! any tabular tool. Full `RunResult` JSON keeps everything needed to
//! regenerate reports later.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use stratlab_core::{EquityCurve, Side, Trade};

use crate::report;
use crate::runner::RunResult;
use crate::walk_forward::WindowResult;

pub(crate) fn iso(ts: NaiveDateTime) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S").to_string()
}

fn finite(v: f64) -> Option<f64> {
    v.is_finite().then_some(v)
}

// ─── Flat records ───────────────────────────────────────────────────

/// One run as a single flat row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub strategy: String,
    pub params: BTreeMap<String, String>,
    pub start: String,
    pub end: String,
    pub bars: usize,
    pub starting_cash: f64,
    pub final_equity: f64,
    pub total_return: f64,
    pub cagr: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub max_drawdown: f64,
    pub calmar_ratio: f64,
    pub win_rate: f64,
    /// Empty when infinite.
    pub profit_factor: Option<f64>,
    pub num_trades: usize,
    pub total_commission: f64,
    pub total_slippage: f64,
    pub rejected_signals: usize,
    pub unfilled_signals: usize,
}

impl RunRecord {
    pub fn from_result(result: &RunResult) -> Self {
        let m = &result.metrics;
        let curve = &result.equity_curve;
        Self {
            strategy: result.strategy.clone(),
            params: result.params.to_string_map(),
            start: curve.first().map(|p| iso(p.timestamp)).unwrap_or_default(),
            end: curve.last().map(|p| iso(p.timestamp)).unwrap_or_default(),
            bars: curve.len().saturating_sub(1),
            starting_cash: result.config.starting_cash,
            final_equity: result.final_equity(),
            total_return: m.total_return,
            cagr: m.cagr,
            sharpe_ratio: m.sharpe_ratio,
            sortino_ratio: m.sortino_ratio,
            max_drawdown: m.max_drawdown,
            calmar_ratio: m.calmar_ratio,
            win_rate: m.win_rate,
            profit_factor: finite(m.profit_factor),
            num_trades: m.num_trades,
            total_commission: result.total_commission,
            total_slippage: result.total_slippage,
            rejected_signals: result.rejected_signals,
            unfilled_signals: result.unfilled_signals,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRow {
    pub side: Side,
    pub signal_time: String,
    pub entry_bar: usize,
    pub entry_time: String,
    pub entry_price: f64,
    pub exit_bar: usize,
    pub exit_time: String,
    pub exit_price: f64,
    pub quantity: f64,
    pub commission_paid: f64,
    pub slippage_paid: f64,
    pub pnl: f64,
    pub return_pct: f64,
    pub bars_held: usize,
}

impl From<&Trade> for TradeRow {
    fn from(t: &Trade) -> Self {
        Self {
            side: t.side,
            signal_time: iso(t.signal_time),
            entry_bar: t.entry_bar,
            entry_time: iso(t.entry_time),
            entry_price: t.entry_price,
            exit_bar: t.exit_bar,
            exit_time: iso(t.exit_time),
            exit_price: t.exit_price,
            quantity: t.quantity,
            commission_paid: t.commission_paid,
            slippage_paid: t.slippage_paid,
            pnl: t.pnl,
            return_pct: t.return_pct(),
            bars_held: t.bars_held(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowRecord {
    pub window_index: usize,
    pub is_start: String,
    pub is_end: String,
    pub oos_start: String,
    pub oos_end: String,
    /// `name=value` pairs, comma separated.
    pub best_params: String,
    pub is_sharpe: f64,
    pub oos_sharpe: f64,
    pub is_total_return: f64,
    pub oos_total_return: f64,
    pub oos_max_drawdown: f64,
    pub oos_trades: usize,
    pub degradation_ratio: Option<f64>,
    pub degradation_flag: String,
}

impl From<&WindowResult> for WindowRecord {
    fn from(w: &WindowResult) -> Self {
        Self {
            window_index: w.window_index,
            is_start: iso(w.in_sample_range.start_time),
            is_end: iso(w.in_sample_range.end_time),
            oos_start: iso(w.out_sample_range.start_time),
            oos_end: iso(w.out_sample_range.end_time),
            best_params: w.best_params.to_string(),
            is_sharpe: w.in_sample_metrics.sharpe_ratio,
            oos_sharpe: w.out_sample_metrics.sharpe_ratio,
            is_total_return: w.in_sample_metrics.total_return,
            oos_total_return: w.out_sample_metrics.total_return,
            oos_max_drawdown: w.out_sample_metrics.max_drawdown,
            oos_trades: w.out_sample_metrics.num_trades,
            degradation_ratio: w.degradation_ratio,
            degradation_flag: format!("{:?}", w.degradation_flag),
        }
    }
}

// ─── CSV / JSON ─────────────────────────────────────────────────────

fn csv_rows<T: Serialize>(rows: impl IntoIterator<Item = T>) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    for row in rows {
        wtr.serialize(row).context("failed to write CSV row")?;
    }
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

/// Trade tape, one row per closed trade.
pub fn trades_csv(trades: &[Trade]) -> Result<String> {
    if trades.is_empty() {
        return Ok(header_line(&[
            "side",
            "signal_time",
            "entry_bar",
            "entry_time",
            "entry_price",
            "exit_bar",
            "exit_time",
            "exit_price",
            "quantity",
            "commission_paid",
            "slippage_paid",
            "pnl",
            "return_pct",
            "bars_held",
        ]));
    }
    csv_rows(trades.iter().map(TradeRow::from))
}

/// Equity curve with `timestamp,point,equity` columns.
///
/// The initial state shares the first bar's timestamp; `point` tells it
/// apart (`start`) from the marks at each bar close (`close`).
pub fn equity_csv(curve: &EquityCurve) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["timestamp", "point", "equity"])?;
    for (i, p) in curve.points().iter().enumerate() {
        let point = if i == 0 { "start" } else { "close" };
        wtr.write_record([iso(p.timestamp), point.to_string(), format!("{:.2}", p.equity)])?;
    }
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

/// Walk-forward windows, one row each.
pub fn windows_csv(windows: &[WindowResult]) -> Result<String> {
    csv_rows(windows.iter().map(WindowRecord::from))
}

/// Pretty JSON of any result type.
pub fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).context("failed to serialize to JSON")
}

// csv::Writer only emits a header alongside the first serialized row.
fn header_line(columns: &[&str]) -> String {
    format!("{}\n", columns.join(","))
}

// ─── Artifact bundle ────────────────────────────────────────────────

/// Write `result.json`, `record.json`, `trades.csv`, `equity.csv` and
/// `report.md` into `dir`, creating it if needed. Returns the written paths.
pub fn save_run(result: &RunResult, dir: &Path) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create output dir: {}", dir.display()))?;
    let files = [
        ("result.json", to_json(result)?),
        ("record.json", to_json(&RunRecord::from_result(result))?),
        ("trades.csv", trades_csv(&result.trades)?),
        ("equity.csv", equity_csv(&result.equity_curve)?),
        ("report.md", report::render_markdown(result)),
    ];
    let mut written = Vec::with_capacity(files.len());
    for (name, contents) in files {
        let path = dir.join(name);
        std::fs::write(&path, contents)
            .with_context(|| format!("failed to write {}", path.display()))?;
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use stratlab_core::{EquityPoint, PortfolioState, SimConfig};

    use crate::metrics::Metrics;

    fn t(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn sample_trade() -> Trade {
        Trade {
            side: Side::Long,
            signal_time: t(2),
            entry_bar: 1,
            entry_time: t(3),
            entry_price: 100.0,
            exit_bar: 4,
            exit_time: t(6),
            exit_price: 110.0,
            quantity: 10.0,
            commission_paid: 1.0,
            slippage_paid: 0.5,
            pnl: 98.5,
        }
    }

    fn sample_result() -> RunResult {
        let curve: EquityCurve = [(t(2), 1_000.0), (t(3), 1_000.0), (t(6), 1_098.5)]
            .into_iter()
            .map(|(timestamp, equity)| EquityPoint { timestamp, equity })
            .collect();
        RunResult {
            schema_version: crate::runner::SCHEMA_VERSION,
            strategy: "buy_and_hold".into(),
            params: Default::default(),
            equity_curve: curve,
            trades: vec![sample_trade()],
            metrics: Metrics {
                total_return: 0.0985,
                profit_factor: f64::INFINITY,
                num_trades: 1,
                win_rate: 1.0,
                ..Metrics::default()
            },
            degenerate: vec![],
            final_state: PortfolioState::new(1_098.5),
            config: SimConfig::frictionless(1_000.0),
            bars_per_year: 252.0,
            rejected_signals: 0,
            unfilled_signals: 0,
            total_commission: 1.0,
            total_slippage: 0.5,
        }
    }

    #[test]
    fn trades_csv_has_header_and_rows() {
        let csv = trades_csv(&[sample_trade()]).unwrap();
        let mut lines = csv.lines();
        let header = lines.next().unwrap();
        assert!(header.starts_with("side,signal_time,entry_bar,entry_time"));
        let row = lines.next().unwrap();
        assert!(row.starts_with("long,2024-01-02T00:00:00,1,2024-01-03T00:00:00,100"));
        assert!(lines.next().is_none());
    }

    #[test]
    fn empty_trades_csv_still_has_header() {
        let csv = trades_csv(&[]).unwrap();
        assert_eq!(csv.lines().count(), 1);
        assert!(csv.starts_with("side,"));
    }

    #[test]
    fn equity_csv_columns() {
        let csv = equity_csv(&sample_result().equity_curve).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "timestamp,point,equity");
        assert_eq!(lines[3], "2024-01-06T00:00:00,close,1098.50");
    }

    #[test]
    fn equity_csv_marks_initial_point_apart_from_first_close() {
        let curve: EquityCurve = [(t(2), 1_000.0), (t(2), 1_004.0)]
            .into_iter()
            .map(|(timestamp, equity)| EquityPoint { timestamp, equity })
            .collect();
        let csv = equity_csv(&curve).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[1], "2024-01-02T00:00:00,start,1000.00");
        assert_eq!(lines[2], "2024-01-02T00:00:00,close,1004.00");
    }

    #[test]
    fn run_record_is_flat() {
        let record = RunRecord::from_result(&sample_result());
        assert_eq!(record.bars, 2);
        assert_eq!(record.start, "2024-01-02T00:00:00");
        assert_eq!(record.profit_factor, None);
        assert_eq!(record.final_equity, 1_098.5);
        let json = to_json(&record).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(value.as_object().unwrap().values().all(|v| !v.is_array()));
    }

    #[test]
    fn save_run_writes_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("run");
        let written = save_run(&sample_result(), &out).unwrap();
        assert_eq!(written.len(), 5);
        for path in &written {
            assert!(path.exists(), "{} missing", path.display());
        }
        let json = std::fs::read_to_string(out.join("result.json")).unwrap();
        let back: RunResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back.metrics.profit_factor, f64::INFINITY);
    }
}
