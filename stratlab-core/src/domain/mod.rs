//! Domain types for StratLab.

pub mod bar;
pub mod equity;
pub mod portfolio;
pub mod trade;

pub use bar::{check_ordering, Bar};
pub use equity::{EquityCurve, EquityPoint};
pub use portfolio::PortfolioState;
pub use trade::{Side, Trade};
