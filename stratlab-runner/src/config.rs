//! Experiment configuration — a TOML request naming the strategy, its
//! parameters, cost assumptions, and search/walk-forward settings.
//!
//! ```toml
//! strategy = "ma_crossover"
//! data = "data/spy.csv"
//!
//! [params]
//! ma_type = "ema"
//!
//! [[ranges]]
//! name = "fast"
//! type = "int"
//! min = 5
//! max = 20
//! step = 5
//!
//! [costs]
//! commission_rate = 0.001
//!
//! [search]
//! method = "random"
//! n_trials = 200
//!
//! [walk_forward]
//! train_length = 252
//! test_length = 63
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use stratlab_core::{ConfigError, ParamSet, SimConfig, Strategy, StrategyRegistry};

use crate::search::{ParamSpace, RangeOverride, SearchConfig};
use crate::walk_forward::WalkForwardConfig;

#[derive(Debug, Error)]
pub enum ExperimentError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse experiment config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExperimentConfig {
    /// Registry id.
    pub strategy: String,
    /// Bar CSV; the CLI `--data` flag takes precedence.
    #[serde(default)]
    pub data: Option<PathBuf>,
    /// Fixed parameters: the run's parameters, or pins during search.
    #[serde(default)]
    pub params: ParamSet,
    /// Search ranges replacing schema ranges.
    #[serde(default)]
    pub ranges: Vec<RangeOverride>,
    #[serde(default)]
    pub costs: SimConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub walk_forward: WalkForwardConfig,
}

impl ExperimentConfig {
    /// A config with every section at its default.
    pub fn for_strategy(strategy: &str) -> Self {
        Self {
            strategy: strategy.to_string(),
            data: None,
            params: ParamSet::new(),
            ranges: Vec::new(),
            costs: SimConfig::default(),
            search: SearchConfig::default(),
            walk_forward: WalkForwardConfig::default(),
        }
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ExperimentError> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: &Path) -> Result<Self, ExperimentError> {
        let text = std::fs::read_to_string(path).map_err(|source| ExperimentError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn bars_per_year(&self) -> f64 {
        self.search.bars_per_year
    }

    /// Look up the strategy and check every section against it.
    pub fn resolve(
        &self,
        registry: &StrategyRegistry,
    ) -> Result<Arc<dyn Strategy>, ExperimentError> {
        let strategy = registry.get(&self.strategy)?;
        strategy.schema().validate(&self.params)?;
        self.costs.validate()?;
        self.search.validate()?;
        self.walk_forward.validate()?;
        self.param_space(strategy.as_ref())?;
        Ok(strategy)
    }

    /// The search space: schema, then range overrides, then pins.
    pub fn param_space(&self, strategy: &dyn Strategy) -> Result<ParamSpace, ConfigError> {
        if let Some(both) = self
            .ranges
            .iter()
            .find(|r| self.params.get(&r.name).is_some())
        {
            return Err(ConfigError::Invalid(format!(
                "parameter '{}' is both fixed and ranged",
                both.name
            )));
        }
        let space = self
            .ranges
            .iter()
            .try_fold(ParamSpace::for_strategy(strategy), |space, r| {
                space.with_override(r)
            })?;
        space.with_fixed_set(&self.params)
    }
}
