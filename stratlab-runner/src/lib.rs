//! StratLab Runner — metrics, parameter search, walk-forward, export.
//!
//! This crate builds on `stratlab-core` to provide:
//! - Performance metrics over equity curves and trade logs
//! - Single-backtest runner producing a `RunResult`
//! - Grid and random parameter search with ranked results
//! - Walk-forward optimization with degradation analysis
//! - TOML experiment configs, CSV bar loading, CSV/JSON export, Markdown reports

pub mod config;
pub mod data_loader;
pub mod export;
pub mod fitness;
pub mod metrics;
pub mod report;
pub mod runner;
pub mod search;
pub mod walk_forward;

pub use config::{ExperimentConfig, ExperimentError};
pub use data_loader::{load_bars_csv, read_bars_csv, LoadError};
pub use export::{RunRecord, TradeRow, WindowRecord};
pub use fitness::TargetMetric;
pub use metrics::{compute_metrics, DegenerateMetric, Metrics};
pub use runner::{run_backtest, run_backtest_from, RunResult};
pub use search::{
    search, CandidateFailure, ParamRange, ParamSpace, RangeOverride, RankedCandidate,
    SearchConfig, SearchError, SearchMethod, SearchOutcome,
};
pub use walk_forward::{
    compute_degradation_ratio, plan_windows, run_walk_forward, BarRange, DegradationFlag,
    WalkForwardConfig, WalkForwardError, WalkForwardSummary, WindowFailure, WindowMode,
    WindowPlan, WindowResult, WindowSpec,
};
