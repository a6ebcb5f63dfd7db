//! StratLab Core — domain types, parameter schema, strategies, execution simulator.
//!
//! - Domain types (bars, trades, portfolio state, equity curve)
//! - Typed parameter sets and the schemas strategies declare
//! - Strategy contract, built-in strategies and the name-keyed registry
//! - Causal indicators
//! - Bar-by-bar Execution Simulator with next-open fills

pub mod domain;
pub mod engine;
pub mod error;
pub mod indicators;
pub mod params;
pub mod rng;
pub mod strategy;

pub use domain::{Bar, EquityCurve, EquityPoint, PortfolioState, Side, Trade};
pub use engine::{simulate, simulate_from, SimConfig, Simulation};
pub use error::{ConfigError, SimError, StrategyError};
pub use params::{ParamKind, ParamSchema, ParamSet, ParamSpec, ParamValue};
pub use strategy::{Signal, Strategy, StrategyRegistry};
