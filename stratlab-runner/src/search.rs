//! Parameter search — grid and random exploration of a strategy's parameter space.
//!
//! Candidates are enumerated up front, filtered through the strategy's own
//! constraints, then evaluated in parallel. Each evaluation is an independent
//! simulation; results come back through rayon's ordered collect.
//!
//! Candidate ParamSets omit parameters left at their schema default, so
//! `ParamSet::cardinality` counts how many knobs a candidate actually turns.
//! Ranking: target score descending (NaN last), then lower cardinality, then
//! earlier enumeration order.

use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};

use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use stratlab_core::domain::check_ordering;
use stratlab_core::engine::MIN_BARS;
use stratlab_core::{
    Bar, ConfigError, ParamKind, ParamSchema, ParamSet, ParamSpec, ParamValue, SimConfig,
    SimError, Strategy,
};

use crate::fitness::{compare_scores, TargetMetric};
use crate::metrics::{Metrics, DEFAULT_BARS_PER_YEAR};
use crate::runner::{check_bars_per_year, run_backtest, RunResult};

/// Errors that stop a search before any candidate runs.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SearchError {
    #[error("invalid search config: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Sim(#[from] SimError),
    #[error("parameter space is empty")]
    EmptySpace,
    #[error("all {0} candidates violate parameter constraints")]
    NoValidCandidates(usize),
    #[error("failed to build thread pool: {0}")]
    ThreadPool(String),
}

// ─── Config ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMethod {
    #[default]
    Grid,
    Random,
}

impl std::str::FromStr for SearchMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "grid" => Ok(Self::Grid),
            "random" => Ok(Self::Random),
            other => Err(format!("unknown search method '{other}' (expected grid or random)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub method: SearchMethod,
    /// Grid cap. Larger products are evaluated on an evenly strided subset.
    pub max_combinations: usize,
    /// Random draws (before duplicate removal).
    pub n_trials: usize,
    pub seed: u64,
    pub target: TargetMetric,
    pub bars_per_year: f64,
    /// Dedicated worker count; `None` uses rayon's global pool.
    pub threads: Option<usize>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            method: SearchMethod::Grid,
            max_combinations: 10_000,
            n_trials: 100,
            seed: 42,
            target: TargetMetric::Sharpe,
            bars_per_year: DEFAULT_BARS_PER_YEAR,
            threads: None,
        }
    }
}

impl SearchConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_bars_per_year(self.bars_per_year)?;
        match self.method {
            SearchMethod::Grid if self.max_combinations == 0 => Err(ConfigError::Invalid(
                "max_combinations must be at least 1".into(),
            )),
            SearchMethod::Random if self.n_trials == 0 => {
                Err(ConfigError::Invalid("n_trials must be at least 1".into()))
            }
            _ if self.threads == Some(0) => {
                Err(ConfigError::Invalid("threads must be at least 1".into()))
            }
            _ => Ok(()),
        }
    }
}

// ─── Parameter space ─────────────────────────────────────────────────

/// A caller-supplied range replacing a schema parameter's declared range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeOverride {
    pub name: String,
    #[serde(flatten)]
    pub range: ParamRange,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParamRange {
    Int { min: i64, max: i64, step: i64 },
    Float { min: f64, max: f64, step: f64 },
    Choice { options: Vec<String> },
}

impl ParamRange {
    fn kind_name(&self) -> &'static str {
        match self {
            Self::Int { .. } => "int",
            Self::Float { .. } => "float",
            Self::Choice { .. } => "choice",
        }
    }
}

/// The searchable space of one strategy: its schema, narrowed by overrides and pins.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpace {
    schema: ParamSchema,
    /// Varied dimensions in schema order.
    dims: Vec<ParamSpec>,
    /// Pinned values, already normalized.
    fixed: ParamSet,
}

impl ParamSpace {
    pub fn new(schema: ParamSchema) -> Self {
        let dims = schema.params.clone();
        Self {
            schema,
            dims,
            fixed: ParamSet::new(),
        }
    }

    pub fn for_strategy(strategy: &dyn Strategy) -> Self {
        Self::new(strategy.schema())
    }

    /// Replace a parameter's range. The override must stay inside the declared range.
    pub fn with_override(mut self, range: &RangeOverride) -> Result<Self, ConfigError> {
        let declared = self
            .schema
            .get(&range.name)
            .ok_or_else(|| ConfigError::UnknownParam(range.name.clone()))?;
        if self.fixed.get(&range.name).is_some() {
            return Err(ConfigError::Invalid(format!(
                "parameter '{}' is pinned and cannot also be ranged",
                range.name
            )));
        }
        let spec = narrowed_spec(declared, &range.range)?;
        spec.check()?;
        if let Some(dim) = self.dims.iter_mut().find(|d| d.name == range.name) {
            *dim = spec;
        }
        Ok(self)
    }

    /// Pin a parameter to one value; it stops being a search dimension.
    pub fn with_fixed(mut self, name: &str, value: &ParamValue) -> Result<Self, ConfigError> {
        let spec = self
            .schema
            .get(name)
            .ok_or_else(|| ConfigError::UnknownParam(name.to_string()))?;
        let value = spec.normalize(value)?;
        self.fixed.insert(name, value);
        self.dims.retain(|d| d.name != name);
        Ok(self)
    }

    /// Pin every entry of `params`.
    pub fn with_fixed_set(self, params: &ParamSet) -> Result<Self, ConfigError> {
        params
            .iter()
            .try_fold(self, |space, (name, value)| space.with_fixed(name, value))
    }

    pub fn schema(&self) -> &ParamSchema {
        &self.schema
    }

    pub fn dimensions(&self) -> &[ParamSpec] {
        &self.dims
    }

    pub fn fixed(&self) -> &ParamSet {
        &self.fixed
    }

    /// Size of the full Cartesian product (saturating).
    pub fn grid_size(&self) -> usize {
        self.dims
            .iter()
            .try_fold(1usize, |acc, d| acc.checked_mul(d.grid_len()))
            .unwrap_or(usize::MAX)
    }

    /// Decode a mixed-radix grid index; the first dimension varies slowest.
    pub fn grid_point(&self, index: usize) -> ParamSet {
        let mut rem = index;
        let mut values = Vec::with_capacity(self.dims.len());
        for dim in self.dims.iter().rev() {
            let len = dim.grid_len().max(1);
            values.push((dim.name.clone(), dim.grid_value(rem % len)));
            rem /= len;
        }
        self.candidate(values)
    }

    /// One random draw per dimension.
    pub fn sample(&self, rng: &mut StdRng) -> ParamSet {
        let values: Vec<(String, ParamValue)> = self
            .dims
            .iter()
            .map(|d| (d.name.clone(), d.sample(rng)))
            .collect();
        self.candidate(values)
    }

    /// Sparse candidate: pins plus dimension values, minus schema defaults.
    fn candidate(&self, values: Vec<(String, ParamValue)>) -> ParamSet {
        let mut set = ParamSet::new();
        let entries = self
            .fixed
            .iter()
            .map(|(n, v)| (n.clone(), v.clone()))
            .chain(values);
        for (name, value) in entries {
            let is_default = self
                .schema
                .get(&name)
                .is_some_and(|spec| spec.default_value() == value);
            if !is_default {
                set.insert(name, value);
            }
        }
        set
    }
}

fn narrowed_spec(declared: &ParamSpec, range: &ParamRange) -> Result<ParamSpec, ConfigError> {
    let outside = |lo: String, hi: String| ConfigError::InvalidRange {
        name: declared.name.clone(),
        reason: format!("override [{lo}, {hi}] leaves the declared range"),
    };
    let kind = match (&declared.kind, range) {
        (
            ParamKind::Int {
                min: dmin,
                max: dmax,
                default,
                ..
            },
            ParamRange::Int { min, max, step },
        ) => {
            if min < dmin || max > dmax {
                return Err(outside(min.to_string(), max.to_string()));
            }
            ParamKind::Int {
                min: *min,
                max: *max,
                step: *step,
                default: (*default).clamp(*min, (*max).max(*min)),
            }
        }
        (
            ParamKind::Float {
                min: dmin,
                max: dmax,
                default,
                ..
            },
            ParamRange::Float { min, max, step },
        ) => {
            if min < dmin || max > dmax {
                return Err(outside(min.to_string(), max.to_string()));
            }
            ParamKind::Float {
                min: *min,
                max: *max,
                step: *step,
                default: default.max(*min).min(max.max(*min)),
            }
        }
        (ParamKind::Choice { options: declared_opts, default }, ParamRange::Choice { options }) => {
            if let Some(bad) = options.iter().find(|o| !declared_opts.contains(o)) {
                return Err(ConfigError::InvalidChoice {
                    name: declared.name.clone(),
                    value: bad.clone(),
                    options: declared_opts.clone(),
                });
            }
            let default = if options.contains(default) {
                default.clone()
            } else {
                options.first().cloned().unwrap_or_else(|| default.clone())
            };
            ParamKind::Choice {
                options: options.clone(),
                default,
            }
        }
        (kind, other) => {
            return Err(ConfigError::TypeMismatch {
                name: declared.name.clone(),
                expected: match kind {
                    ParamKind::Int { .. } => "int",
                    ParamKind::Float { .. } => "float",
                    ParamKind::Choice { .. } => "choice",
                },
                actual: format!("{} range", other.kind_name()),
            })
        }
    };
    Ok(ParamSpec {
        name: declared.name.clone(),
        kind,
    })
}

// ─── Outcome ─────────────────────────────────────────────────────────

/// One successfully evaluated candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedCandidate {
    /// Position in enumeration order.
    pub index: usize,
    /// Non-default parameters as enumerated.
    pub params: ParamSet,
    /// Full parameter set the simulation ran with.
    pub resolved: ParamSet,
    pub metrics: Metrics,
    pub score: f64,
}

/// A candidate whose simulation returned an error or panicked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateFailure {
    pub index: usize,
    pub params: ParamSet,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub strategy: String,
    pub target: TargetMetric,
    /// Full result for the top-ranked candidate; `None` when nothing succeeded.
    pub best: Option<RunResult>,
    pub ranked: Vec<RankedCandidate>,
    pub failures: Vec<CandidateFailure>,
    pub warnings: Vec<String>,
    /// Candidates enumerated after capping and duplicate removal.
    pub total_candidates: usize,
    /// Candidates rejected by the strategy's parameter constraints.
    pub skipped_invalid: usize,
    pub duplicates_dropped: usize,
    pub cancelled: bool,
}

impl SearchOutcome {
    pub fn best_params(&self) -> Option<&ParamSet> {
        self.best.as_ref().map(|b| &b.params)
    }

    pub fn evaluated(&self) -> usize {
        self.ranked.len() + self.failures.len()
    }
}

// ─── Search ──────────────────────────────────────────────────────────

struct Candidate {
    index: usize,
    params: ParamSet,
    resolved: ParamSet,
}

enum Evaluation {
    Done(RankedCandidate),
    Failed(CandidateFailure),
    Cancelled,
}

pub(crate) fn is_cancelled(cancel: Option<&AtomicBool>) -> bool {
    cancel.is_some_and(|f| f.load(Ordering::Relaxed))
}

/// Search `space` for the parameters that maximize `config.target`.
///
/// Runs on a dedicated pool when `config.threads` is set.
pub fn search(
    bars: &[Bar],
    strategy: &dyn Strategy,
    space: &ParamSpace,
    sim: &SimConfig,
    config: &SearchConfig,
    cancel: Option<&AtomicBool>,
) -> Result<SearchOutcome, SearchError> {
    match config.threads {
        Some(n) => {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(n)
                .build()
                .map_err(|e| SearchError::ThreadPool(e.to_string()))?;
            pool.install(|| search_in_pool(bars, strategy, space, sim, config, cancel))
        }
        None => search_in_pool(bars, strategy, space, sim, config, cancel),
    }
}

/// Validate everything shared by every candidate.
pub(crate) fn preflight(
    bars: &[Bar],
    sim: &SimConfig,
    config: &SearchConfig,
) -> Result<(), SearchError> {
    sim.validate()?;
    config.validate()?;
    if bars.len() < MIN_BARS {
        return Err(SimError::InsufficientData {
            required: MIN_BARS,
            actual: bars.len(),
        }
        .into());
    }
    check_ordering(bars)?;
    Ok(())
}

/// Search on whatever rayon pool is current.
pub(crate) fn search_in_pool(
    bars: &[Bar],
    strategy: &dyn Strategy,
    space: &ParamSpace,
    sim: &SimConfig,
    config: &SearchConfig,
    cancel: Option<&AtomicBool>,
) -> Result<SearchOutcome, SearchError> {
    preflight(bars, sim, config)?;

    let mut warnings = Vec::new();
    let (candidates, duplicates_dropped) = enumerate(space, config, &mut warnings)?;
    let total_candidates = candidates.len();

    let mut skipped_invalid = 0;
    let mut valid = Vec::with_capacity(candidates.len());
    for (index, params) in candidates.into_iter().enumerate() {
        match strategy.resolve_params(&params) {
            Ok(resolved) => valid.push(Candidate {
                index,
                params,
                resolved,
            }),
            Err(e) => {
                debug!(index, params = %params, error = %e, "skipping invalid candidate");
                skipped_invalid += 1;
            }
        }
    }
    if valid.is_empty() {
        return Err(SearchError::NoValidCandidates(total_candidates));
    }

    info!(
        strategy = strategy.name(),
        method = ?config.method,
        candidates = valid.len(),
        skipped_invalid,
        target = %config.target,
        "starting parameter search"
    );

    let evaluations: Vec<Evaluation> = valid
        .par_iter()
        .map(|c| evaluate(bars, strategy, sim, config, c, cancel))
        .collect();

    let mut ranked = Vec::new();
    let mut failures = Vec::new();
    let mut cancelled = false;
    for evaluation in evaluations {
        match evaluation {
            Evaluation::Done(r) => ranked.push(r),
            Evaluation::Failed(f) => {
                warn!(index = f.index, params = %f.params, error = %f.error, "candidate failed");
                failures.push(f);
            }
            Evaluation::Cancelled => cancelled = true,
        }
    }
    ranked.sort_by(|a, b| {
        compare_scores(a.score, b.score)
            .then(a.params.cardinality().cmp(&b.params.cardinality()))
            .then(a.index.cmp(&b.index))
    });

    let best = match ranked.first() {
        Some(top) => Some(run_backtest(
            bars,
            strategy,
            &top.resolved,
            sim,
            config.bars_per_year,
        )?),
        None => None,
    };

    if cancelled {
        warn!(evaluated = ranked.len() + failures.len(), "search cancelled");
    }
    info!(
        strategy = strategy.name(),
        succeeded = ranked.len(),
        failed = failures.len(),
        best_score = ranked.first().map(|r| r.score),
        "parameter search finished"
    );

    Ok(SearchOutcome {
        strategy: strategy.name().to_string(),
        target: config.target,
        best,
        ranked,
        failures,
        warnings,
        total_candidates,
        skipped_invalid,
        duplicates_dropped,
        cancelled,
    })
}

/// Candidates in enumeration order, plus the number of duplicate draws removed.
fn enumerate(
    space: &ParamSpace,
    config: &SearchConfig,
    warnings: &mut Vec<String>,
) -> Result<(Vec<ParamSet>, usize), SearchError> {
    let total = space.grid_size();
    if total == 0 {
        return Err(SearchError::EmptySpace);
    }
    match config.method {
        SearchMethod::Grid => Ok((grid_candidates(space, config.max_combinations, warnings), 0)),
        SearchMethod::Random => {
            let mut rng = StdRng::seed_from_u64(config.seed);
            let mut seen = HashSet::with_capacity(config.n_trials);
            let mut candidates = Vec::with_capacity(config.n_trials);
            let mut duplicates = 0;
            for _ in 0..config.n_trials {
                let params = space.sample(&mut rng);
                if seen.insert(params.clone()) {
                    candidates.push(params);
                } else {
                    duplicates += 1;
                }
            }
            if duplicates > 0 {
                debug!(duplicates, "dropped duplicate random draws");
            }
            Ok((candidates, duplicates))
        }
    }
}

/// Full grid, or an evenly strided subset of `cap` points when the grid is larger.
fn grid_candidates(space: &ParamSpace, cap: usize, warnings: &mut Vec<String>) -> Vec<ParamSet> {
    let total = space.grid_size();
    if total <= cap {
        return (0..total).map(|i| space.grid_point(i)).collect();
    }
    let message = format!(
        "grid has {total} combinations, exceeding max_combinations {cap}; evaluating a strided subset of {cap}"
    );
    warn!("{message}");
    warnings.push(message);
    (0..cap)
        .map(|i| {
            let index = (i as u128 * total as u128 / cap as u128) as usize;
            space.grid_point(index)
        })
        .collect()
}

fn evaluate(
    bars: &[Bar],
    strategy: &dyn Strategy,
    sim: &SimConfig,
    config: &SearchConfig,
    candidate: &Candidate,
    cancel: Option<&AtomicBool>,
) -> Evaluation {
    if is_cancelled(cancel) {
        return Evaluation::Cancelled;
    }
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        run_backtest(bars, strategy, &candidate.resolved, sim, config.bars_per_year)
    }));
    let failure = |error: String| {
        Evaluation::Failed(CandidateFailure {
            index: candidate.index,
            params: candidate.params.clone(),
            error,
        })
    };
    match outcome {
        Ok(Ok(result)) => Evaluation::Done(RankedCandidate {
            index: candidate.index,
            params: candidate.params.clone(),
            resolved: candidate.resolved.clone(),
            score: config.target.score(&result.metrics),
            metrics: result.metrics,
        }),
        Ok(Err(e)) => failure(e.to_string()),
        Err(payload) => failure(format!("panicked: {}", panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
