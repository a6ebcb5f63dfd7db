//! Walk-forward optimization — rolling in-sample search, frozen out-of-sample test.
//!
//! History is cut into windows of `train_length` in-sample bars followed by
//! `test_length` out-of-sample bars. Each window runs a full parameter search
//! in-sample, then replays the winner on the out-of-sample segment. A window
//! that fails is recorded and the rest continue.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::AtomicBool;

use chrono::NaiveDateTime;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use stratlab_core::engine::MIN_BARS;
use stratlab_core::rng::RngHierarchy;
use stratlab_core::{Bar, ConfigError, ParamSet, SimConfig, SimError, Strategy};

use crate::fitness::TargetMetric;
use crate::metrics::{mean, std_dev, Metrics};
use crate::runner::{run_backtest, run_backtest_from, RunResult};
use crate::search::{self, is_cancelled, ParamSpace, SearchConfig, SearchError};

/// Errors that stop walk-forward before any window runs.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WalkForwardError {
    #[error("invalid walk-forward config: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Sim(#[from] SimError),
    #[error(transparent)]
    Search(#[from] SearchError),
    #[error("failed to build thread pool: {0}")]
    ThreadPool(String),
}

// ─── Config ──────────────────────────────────────────────────────────

/// How consecutive windows are placed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowMode {
    /// Start advances by `test_length`: out-of-sample segments tile the history.
    #[default]
    Rolling,
    /// Start advances by `train_length + test_length`: windows are disjoint.
    Block,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalkForwardConfig {
    pub train_length: usize,
    pub test_length: usize,
    pub mode: WindowMode,
    /// Let out-of-sample runs see the in-sample bars as indicator history.
    pub oos_lead_in: bool,
    /// Mean degradation below this marks the strategy as likely overfit.
    pub overfit_threshold: f64,
    /// Degradation ratios are clamped to `±ratio_cap`.
    pub ratio_cap: f64,
    /// In-sample Sharpe with magnitude below this gives no ratio.
    pub near_zero_sharpe: f64,
}

impl Default for WalkForwardConfig {
    fn default() -> Self {
        Self {
            train_length: 252,
            test_length: 63,
            mode: WindowMode::Rolling,
            oos_lead_in: true,
            overfit_threshold: 0.5,
            ratio_cap: 10.0,
            near_zero_sharpe: 0.05,
        }
    }
}

impl WalkForwardConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.train_length < MIN_BARS || self.test_length < MIN_BARS {
            return Err(ConfigError::Invalid(format!(
                "train_length and test_length must be at least {MIN_BARS}, got {} and {}",
                self.train_length, self.test_length
            )));
        }
        if !self.overfit_threshold.is_finite() {
            return Err(ConfigError::Invalid("overfit_threshold must be finite".into()));
        }
        if !(self.ratio_cap.is_finite() && self.ratio_cap > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "ratio_cap must be positive, got {}",
                self.ratio_cap
            )));
        }
        if !(self.near_zero_sharpe.is_finite() && self.near_zero_sharpe >= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "near_zero_sharpe must be non-negative, got {}",
                self.near_zero_sharpe
            )));
        }
        Ok(())
    }

    /// Bars required for one complete window.
    pub fn min_bars(&self) -> usize {
        self.train_length.saturating_add(self.test_length)
    }

    fn step(&self) -> usize {
        match self.mode {
            WindowMode::Rolling => self.test_length,
            WindowMode::Block => self.min_bars(),
        }
    }
}

// ─── Window planning ─────────────────────────────────────────────────

/// Bar-index bounds of one window; ends are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSpec {
    pub index: usize,
    pub train_start: usize,
    pub train_end: usize,
    pub test_start: usize,
    pub test_end: usize,
}

impl WindowSpec {
    pub fn train_len(&self) -> usize {
        self.train_end - self.train_start
    }

    pub fn test_len(&self) -> usize {
        self.test_end - self.test_start
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowPlan {
    pub windows: Vec<WindowSpec>,
    /// Trailing bars that do not fit a complete window.
    pub discarded_bars: usize,
}

/// Partition `n_bars` into complete windows; the tail is discarded, never padded.
pub fn plan_windows(n_bars: usize, config: &WalkForwardConfig) -> Result<WindowPlan, WalkForwardError> {
    config.validate()?;
    let required = config.min_bars();
    if n_bars < required {
        return Err(SimError::InsufficientData {
            required,
            actual: n_bars,
        }
        .into());
    }
    let mut windows = Vec::new();
    let mut start = 0;
    while start + required <= n_bars {
        let train_end = start + config.train_length;
        windows.push(WindowSpec {
            index: windows.len(),
            train_start: start,
            train_end,
            test_start: train_end,
            test_end: train_end + config.test_length,
        });
        start += config.step();
    }
    let covered = windows.last().map_or(0, |w| w.test_end);
    Ok(WindowPlan {
        windows,
        discarded_bars: n_bars - covered,
    })
}

// ─── Degradation ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradationFlag {
    /// Ratio computed normally.
    Normal,
    /// In-sample Sharpe too close to zero to divide by; no ratio.
    NearZeroInSample,
    /// In-sample Sharpe negative; a ratio would invert its meaning, so none.
    NegativeInSample,
    /// Ratio exceeded the cap and was clamped.
    Capped,
}

/// `oos_sharpe / is_sharpe`, guarded against near-zero and negative denominators.
pub fn compute_degradation_ratio(
    is_sharpe: f64,
    oos_sharpe: f64,
    config: &WalkForwardConfig,
) -> (Option<f64>, DegradationFlag) {
    if !is_sharpe.is_finite() || is_sharpe.abs() < config.near_zero_sharpe {
        return (None, DegradationFlag::NearZeroInSample);
    }
    if is_sharpe < 0.0 {
        return (None, DegradationFlag::NegativeInSample);
    }
    let ratio = oos_sharpe / is_sharpe;
    if !ratio.is_finite() || ratio.abs() > config.ratio_cap {
        let capped = if ratio.is_nan() {
            0.0
        } else {
            ratio.clamp(-config.ratio_cap, config.ratio_cap)
        };
        (Some(capped), DegradationFlag::Capped)
    } else {
        (Some(ratio), DegradationFlag::Normal)
    }
}

// ─── Results ─────────────────────────────────────────────────────────

/// Bar-index range with the timestamps of its first and last bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BarRange {
    pub start: usize,
    /// Exclusive.
    pub end: usize,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
}

impl BarRange {
    fn of(bars: &[Bar], start: usize, end: usize) -> Self {
        Self {
            start,
            end,
            start_time: bars[start].timestamp,
            end_time: bars[end - 1].timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowResult {
    pub window_index: usize,
    pub in_sample_range: BarRange,
    pub out_sample_range: BarRange,
    pub best_params: ParamSet,
    pub in_sample_metrics: Metrics,
    pub out_sample_metrics: Metrics,
    pub degradation_ratio: Option<f64>,
    pub degradation_flag: DegradationFlag,
    pub candidates_evaluated: usize,
    pub candidate_failures: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowFailure {
    pub window_index: usize,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalkForwardSummary {
    pub strategy: String,
    pub target: TargetMetric,
    pub config: WalkForwardConfig,
    pub windows: Vec<WindowResult>,
    pub failures: Vec<WindowFailure>,
    pub planned_windows: usize,
    pub discarded_bars: usize,
    pub mean_is_sharpe: f64,
    pub mean_oos_sharpe: f64,
    pub std_oos_sharpe: f64,
    /// Mean over windows that produced a ratio.
    pub mean_degradation: Option<f64>,
    /// Product of `1 + oos total_return` across completed windows, minus 1.
    pub compounded_oos_return: f64,
    pub overfit_suspected: bool,
    pub cancelled: bool,
}

impl WalkForwardSummary {
    pub fn completed_windows(&self) -> usize {
        self.windows.len()
    }

    pub fn failed_windows(&self) -> usize {
        self.failures.len()
    }

    fn aggregate(
        strategy: &str,
        target: TargetMetric,
        config: &WalkForwardConfig,
        plan: &WindowPlan,
        windows: Vec<WindowResult>,
        failures: Vec<WindowFailure>,
        cancelled: bool,
    ) -> Self {
        let oos_sharpes: Vec<f64> = windows
            .iter()
            .map(|w| w.out_sample_metrics.sharpe_ratio)
            .collect();
        let is_sharpes: Vec<f64> = windows
            .iter()
            .map(|w| w.in_sample_metrics.sharpe_ratio)
            .collect();
        let ratios: Vec<f64> = windows.iter().filter_map(|w| w.degradation_ratio).collect();

        let mean_oos_sharpe = mean(&oos_sharpes);
        let std_oos_sharpe = std_dev(&oos_sharpes);
        let mean_degradation = (!ratios.is_empty()).then(|| mean(&ratios));
        let compounded_oos_return = windows
            .iter()
            .fold(1.0, |acc, w| acc * (1.0 + w.out_sample_metrics.total_return))
            - 1.0;
        let overfit_suspected = !windows.is_empty()
            && (mean_degradation.is_some_and(|d| d < config.overfit_threshold)
                || std_oos_sharpe > mean_oos_sharpe);

        Self {
            strategy: strategy.to_string(),
            target,
            config: config.clone(),
            planned_windows: plan.windows.len(),
            discarded_bars: plan.discarded_bars,
            mean_is_sharpe: mean(&is_sharpes),
            mean_oos_sharpe,
            std_oos_sharpe,
            mean_degradation,
            compounded_oos_return,
            overfit_suspected,
            windows,
            failures,
            cancelled,
        }
    }
}

// ─── Driver ──────────────────────────────────────────────────────────

enum WindowOutcome {
    Done(WindowResult),
    Failed(WindowFailure),
    Cancelled,
}

/// Everything a window needs besides its bounds.
struct Job<'a> {
    bars: &'a [Bar],
    strategy: &'a dyn Strategy,
    space: &'a ParamSpace,
    sim: &'a SimConfig,
    search: &'a SearchConfig,
    config: &'a WalkForwardConfig,
    cancel: Option<&'a AtomicBool>,
}

/// Run walk-forward optimization over `bars`.
///
/// Windows are searched in parallel; `search.threads` sizes a dedicated pool
/// shared by the window and candidate levels.
pub fn run_walk_forward(
    bars: &[Bar],
    strategy: &dyn Strategy,
    space: &ParamSpace,
    sim: &SimConfig,
    search: &SearchConfig,
    config: &WalkForwardConfig,
    cancel: Option<&AtomicBool>,
) -> Result<WalkForwardSummary, WalkForwardError> {
    config.validate()?;
    search::preflight(bars, sim, search)?;
    let plan = plan_windows(bars.len(), config)?;

    info!(
        strategy = strategy.name(),
        windows = plan.windows.len(),
        discarded_bars = plan.discarded_bars,
        mode = ?config.mode,
        "starting walk-forward"
    );

    let job = Job {
        bars,
        strategy,
        space,
        sim,
        search,
        config,
        cancel,
    };
    let outcomes = match search.threads {
        Some(n) => {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(n)
                .build()
                .map_err(|e| WalkForwardError::ThreadPool(e.to_string()))?;
            pool.install(|| run_windows(&job, &plan))
        }
        None => run_windows(&job, &plan),
    };

    let mut windows = Vec::new();
    let mut failures = Vec::new();
    let mut cancelled = false;
    for outcome in outcomes {
        match outcome {
            WindowOutcome::Done(w) => windows.push(w),
            WindowOutcome::Failed(f) => {
                warn!(window = f.window_index, error = %f.error, "walk-forward window failed");
                failures.push(f);
            }
            WindowOutcome::Cancelled => cancelled = true,
        }
    }

    let summary = WalkForwardSummary::aggregate(
        strategy.name(),
        search.target,
        config,
        &plan,
        windows,
        failures,
        cancelled,
    );
    info!(
        completed = summary.completed_windows(),
        failed = summary.failed_windows(),
        mean_oos_sharpe = summary.mean_oos_sharpe,
        overfit_suspected = summary.overfit_suspected,
        "walk-forward finished"
    );
    Ok(summary)
}

fn run_windows(job: &Job<'_>, plan: &WindowPlan) -> Vec<WindowOutcome> {
    plan.windows
        .par_iter()
        .map(|w| run_window(job, w))
        .collect()
}

fn run_window(job: &Job<'_>, window: &WindowSpec) -> WindowOutcome {
    if is_cancelled(job.cancel) {
        return WindowOutcome::Cancelled;
    }
    let failed = |error: String| {
        WindowOutcome::Failed(WindowFailure {
            window_index: window.index,
            error,
        })
    };

    let window_search = SearchConfig {
        seed: RngHierarchy::new(job.search.seed).sub_seed("walk_forward_window", window.index as u64),
        threads: None,
        ..job.search.clone()
    };
    let in_sample = &job.bars[window.train_start..window.train_end];
    let outcome = match search::search_in_pool(
        in_sample,
        job.strategy,
        job.space,
        job.sim,
        &window_search,
        job.cancel,
    ) {
        Ok(o) => o,
        Err(e) => return failed(format!("in-sample search: {e}")),
    };
    if outcome.cancelled {
        return WindowOutcome::Cancelled;
    }
    let candidates_evaluated = outcome.evaluated();
    let candidate_failures = outcome.failures.len();
    let Some(best) = outcome.best else {
        return failed(format!(
            "no in-sample candidate succeeded ({candidate_failures} failed)"
        ));
    };

    let oos = match panic::catch_unwind(AssertUnwindSafe(|| out_of_sample(job, window, &best))) {
        Ok(Ok(r)) => r,
        Ok(Err(e)) => return failed(format!("out-of-sample run: {e}")),
        Err(_) => return failed("out-of-sample run panicked".into()),
    };

    let (degradation_ratio, degradation_flag) = compute_degradation_ratio(
        best.metrics.sharpe_ratio,
        oos.metrics.sharpe_ratio,
        job.config,
    );
    WindowOutcome::Done(WindowResult {
        window_index: window.index,
        in_sample_range: BarRange::of(job.bars, window.train_start, window.train_end),
        out_sample_range: BarRange::of(job.bars, window.test_start, window.test_end),
        best_params: best.params,
        in_sample_metrics: best.metrics,
        out_sample_metrics: oos.metrics,
        degradation_ratio,
        degradation_flag,
        candidates_evaluated,
        candidate_failures,
    })
}

/// Replay the in-sample winner on the test segment with frozen parameters.
fn out_of_sample(job: &Job<'_>, window: &WindowSpec, best: &RunResult) -> Result<RunResult, SimError> {
    let bpy = job.search.bars_per_year;
    if job.config.oos_lead_in {
        run_backtest_from(
            &job.bars[window.train_start..window.test_end],
            window.train_len(),
            job.strategy,
            &best.params,
            job.sim,
            bpy,
        )
    } else {
        run_backtest(
            &job.bars[window.test_start..window.test_end],
            job.strategy,
            &best.params,
            job.sim,
            bpy,
        )
    }
}
