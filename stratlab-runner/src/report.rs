//! Markdown reports, regenerated from stored results.

use std::fmt::Write as _;
use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::export::iso;
use crate::metrics::Metrics;
use crate::runner::{RunResult, SCHEMA_VERSION};
use crate::search::SearchOutcome;
use crate::walk_forward::WalkForwardSummary;

fn pct(v: f64) -> String {
    format!("{:+.2}%", v * 100.0)
}

fn ratio(v: f64) -> String {
    if v.is_infinite() {
        "inf".to_string()
    } else {
        format!("{v:.3}")
    }
}

fn metrics_table(out: &mut String, m: &Metrics) {
    out.push_str("| Metric | Value |\n|--------|-------|\n");
    let rows = [
        ("Total Return", pct(m.total_return)),
        ("CAGR", pct(m.cagr)),
        ("Sharpe", ratio(m.sharpe_ratio)),
        ("Sortino", ratio(m.sortino_ratio)),
        ("Max Drawdown", pct(m.max_drawdown)),
        ("Calmar", ratio(m.calmar_ratio)),
        ("Win Rate", format!("{:.1}%", m.win_rate * 100.0)),
        ("Profit Factor", ratio(m.profit_factor)),
        ("Trades", m.num_trades.to_string()),
    ];
    for (name, value) in rows {
        let _ = writeln!(out, "| {name} | {value} |");
    }
}

/// Single-run report.
pub fn render_markdown(result: &RunResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# StratLab Run Report\n");
    let _ = writeln!(out, "Strategy: `{}`\n", result.strategy);
    if let (Some(first), Some(last)) = (result.equity_curve.first(), result.equity_curve.last()) {
        let _ = writeln!(
            out,
            "Period: {} → {} ({} bars)\n",
            iso(first.timestamp),
            iso(last.timestamp),
            result.equity_curve.len().saturating_sub(1)
        );
    }

    out.push_str("## Parameters\n\n");
    if result.params.is_empty() {
        out.push_str("_none_\n");
    } else {
        out.push_str("| Parameter | Value |\n|-----------|-------|\n");
        for (name, value) in result.params.iter() {
            let _ = writeln!(out, "| {name} | {value} |");
        }
    }

    out.push_str("\n## Performance\n\n");
    metrics_table(&mut out, &result.metrics);
    if !result.degenerate.is_empty() {
        out.push('\n');
        for flag in &result.degenerate {
            let _ = writeln!(out, "- Note: {}", flag.describe());
        }
    }

    let _ = write!(
        out,
        "\n## Capital & Costs\n\n\
- Starting cash: {:.2}\n\
- Final equity: {:.2}\n\
- Commission paid: {:.2}\n\
- Slippage paid: {:.2}\n",
        result.config.starting_cash,
        result.final_equity(),
        result.total_commission,
        result.total_slippage,
    );
    if result.rejected_signals > 0 {
        let _ = writeln!(
            out,
            "- Short signals ignored (shorting disabled): {}",
            result.rejected_signals
        );
    }
    if result.unfilled_signals > 0 {
        let _ = writeln!(
            out,
            "- Signals dropped (no valid open on the fill bar): {}",
            result.unfilled_signals
        );
    }
    if !result.final_state.is_flat() {
        let _ = writeln!(
            out,
            "- Open position at end: {:.4} @ {:.2} (not counted as a trade)",
            result.final_state.position_quantity, result.final_state.position_avg_price
        );
    }

    if !result.trades.is_empty() {
        let mut sorted: Vec<_> = result.trades.iter().collect();
        sorted.sort_by(|a, b| b.pnl.total_cmp(&a.pnl));

        out.push_str("\n## Trade Tape\n\n### Top Winners\n");
        out.push_str("| Side | Entry | Exit | PnL | Return |\n|------|-------|------|-----|--------|\n");
        for t in sorted.iter().take(5).filter(|t| t.pnl > 0.0) {
            let _ = writeln!(
                out,
                "| {:?} | {} | {} | {:+.2} | {} |",
                t.side,
                iso(t.entry_time),
                iso(t.exit_time),
                t.pnl,
                pct(t.return_pct())
            );
        }
        out.push_str("\n### Top Losers\n");
        out.push_str("| Side | Entry | Exit | PnL | Return |\n|------|-------|------|-----|--------|\n");
        for t in sorted.iter().rev().take(5).filter(|t| t.pnl <= 0.0) {
            let _ = writeln!(
                out,
                "| {:?} | {} | {} | {:+.2} | {} |",
                t.side,
                iso(t.entry_time),
                iso(t.exit_time),
                t.pnl,
                pct(t.return_pct())
            );
        }
    }
    out
}

/// Search leaderboard: the `top` best candidates plus failures and warnings.
pub fn render_search(outcome: &SearchOutcome, top: usize) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "# Parameter Search: `{}`\n\nTarget: {}\n",
        outcome.strategy, outcome.target
    );
    let _ = writeln!(
        out,
        "- Candidates: {} ({} evaluated, {} failed, {} invalid, {} duplicate draws)",
        outcome.total_candidates,
        outcome.evaluated(),
        outcome.failures.len(),
        outcome.skipped_invalid,
        outcome.duplicates_dropped
    );
    if outcome.cancelled {
        out.push_str("- **Cancelled before completion**\n");
    }
    for w in &outcome.warnings {
        let _ = writeln!(out, "- Warning: {w}");
    }

    out.push_str("\n## Ranking\n\n");
    out.push_str("| Rank | Params | Score | Sharpe | Return | Max DD | Trades |\n");
    out.push_str("|------|--------|-------|--------|--------|--------|--------|\n");
    for (rank, c) in outcome.ranked.iter().take(top).enumerate() {
        let params = if c.params.is_empty() {
            "(defaults)".to_string()
        } else {
            c.params.to_string()
        };
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} | {} | {} | {} |",
            rank + 1,
            params,
            ratio(c.score),
            ratio(c.metrics.sharpe_ratio),
            pct(c.metrics.total_return),
            pct(c.metrics.max_drawdown),
            c.metrics.num_trades
        );
    }

    if !outcome.failures.is_empty() {
        out.push_str("\n## Failures\n\n");
        for f in &outcome.failures {
            let _ = writeln!(out, "- #{} ({}): {}", f.index, f.params, f.error);
        }
    }
    out
}

/// Walk-forward report: per-window table and aggregate verdict.
pub fn render_walk_forward(summary: &WalkForwardSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "# Walk-Forward Report: `{}`\n\nTarget: {} | train {} / test {} bars ({:?})\n",
        summary.strategy,
        summary.target,
        summary.config.train_length,
        summary.config.test_length,
        summary.config.mode
    );

    let _ = write!(
        out,
        "## Summary\n\n\
- Windows: {} completed, {} failed, {} planned ({} trailing bars discarded)\n\
- Mean IS Sharpe: {:.3}\n\
- Mean OOS Sharpe: {:.3} (std {:.3})\n\
- Mean degradation: {}\n\
- Compounded OOS return: {}\n\
- Overfit suspected: {}\n",
        summary.completed_windows(),
        summary.failed_windows(),
        summary.planned_windows,
        summary.discarded_bars,
        summary.mean_is_sharpe,
        summary.mean_oos_sharpe,
        summary.std_oos_sharpe,
        summary
            .mean_degradation
            .map_or_else(|| "n/a".to_string(), |d| format!("{d:.3}")),
        pct(summary.compounded_oos_return),
        if summary.overfit_suspected { "YES" } else { "no" },
    );
    if summary.cancelled {
        out.push_str("- **Cancelled before completion**\n");
    }

    out.push_str("\n## Windows\n\n");
    out.push_str("| # | In-sample | Out-of-sample | Best params | IS Sharpe | OOS Sharpe | OOS Return | Degradation |\n");
    out.push_str("|---|-----------|---------------|-------------|-----------|------------|------------|-------------|\n");
    for w in &summary.windows {
        let degradation = match w.degradation_ratio {
            Some(r) => format!("{r:.3} ({:?})", w.degradation_flag),
            None => format!("n/a ({:?})", w.degradation_flag),
        };
        let _ = writeln!(
            out,
            "| {} | {} → {} | {} → {} | {} | {:.3} | {:.3} | {} | {} |",
            w.window_index,
            iso(w.in_sample_range.start_time),
            iso(w.in_sample_range.end_time),
            iso(w.out_sample_range.start_time),
            iso(w.out_sample_range.end_time),
            w.best_params,
            w.in_sample_metrics.sharpe_ratio,
            w.out_sample_metrics.sharpe_ratio,
            pct(w.out_sample_metrics.total_return),
            degradation
        );
    }

    if !summary.failures.is_empty() {
        out.push_str("\n## Failed Windows\n\n");
        for f in &summary.failures {
            let _ = writeln!(out, "- Window {}: {}", f.window_index, f.error);
        }
    }
    out
}

/// Parse a stored `RunResult`, rejecting newer schema versions.
pub fn import_json(json: &str) -> Result<RunResult> {
    let result: RunResult =
        serde_json::from_str(json).context("failed to deserialize RunResult from JSON")?;
    if result.schema_version > SCHEMA_VERSION {
        bail!(
            "unsupported schema version {} (max supported: {})",
            result.schema_version,
            SCHEMA_VERSION
        );
    }
    Ok(result)
}

/// Read a stored `RunResult` from disk.
pub fn load_run(path: &Path) -> Result<RunResult> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    import_json(&json)
}
