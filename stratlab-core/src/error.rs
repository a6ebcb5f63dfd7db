//! Error taxonomy shared by the engine and everything built on it.
//!
//! - `ConfigError`: a request that is rejected before any simulation runs.
//! - `StrategyError`: a strategy failed to produce a signal for one window.
//! - `SimError`: why a single simulation could not produce a result.

use chrono::NaiveDateTime;
use thiserror::Error;

/// Invalid configuration: bad cost assumptions, unknown strategy, bad parameters.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("starting cash must be non-negative, got {0}")]
    NegativeCash(f64),
    #[error("{name} must be in [0, 1), got {value}")]
    RateOutOfRange { name: &'static str, value: f64 },
    #[error("max_leverage must be non-negative and finite, got {0}")]
    InvalidLeverage(f64),
    #[error("bars_per_year must be positive, got {0}")]
    InvalidBarsPerYear(f64),
    #[error("unknown strategy '{0}'")]
    UnknownStrategy(String),
    #[error("unknown parameter '{0}'")]
    UnknownParam(String),
    #[error("parameter '{name}' expects {expected}, got {actual}")]
    TypeMismatch {
        name: String,
        expected: &'static str,
        actual: String,
    },
    #[error("parameter '{name}' = {value} is outside [{min}, {max}]")]
    OutOfRange {
        name: String,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("parameter '{name}' = '{value}' is not one of {options:?}")]
    InvalidChoice {
        name: String,
        value: String,
        options: Vec<String>,
    },
    #[error("invalid range for parameter '{name}': {reason}")]
    InvalidRange { name: String, reason: String },
    #[error("invalid parameter combination: {0}")]
    Constraint(String),
    #[error("{0}")]
    Invalid(String),
}

/// A strategy could not evaluate its window.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("strategy '{strategy}' failed: {message}")]
pub struct StrategyError {
    pub strategy: String,
    pub message: String,
}

impl StrategyError {
    pub fn new(strategy: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            strategy: strategy.into(),
            message: message.into(),
        }
    }
}

/// Errors from a single simulation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimError {
    #[error("insufficient data: {actual} bars, need at least {required}")]
    InsufficientData { required: usize, actual: usize },
    #[error("bars out of order at index {index}: {current} does not follow {previous}")]
    DataOrdering {
        index: usize,
        previous: NaiveDateTime,
        current: NaiveDateTime,
    },
    #[error("invalid config: {0}")]
    InvalidConfig(#[from] ConfigError),
    #[error("signal at bar {bar_index}: {source}")]
    Strategy {
        bar_index: usize,
        #[source]
        source: StrategyError,
    },
}
