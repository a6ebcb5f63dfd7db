//! Execution Simulator — bar-by-bar replay of one strategy under one parameter set.
//!
//! The strategy's indicator series are computed once before the loop.
//!
//! Per bar t:
//! 1. Open: execute the signal computed at the close of bar t-1
//! 2. Close: mark to market, append the equity point
//! 3. Signal: evaluate the strategy on `bars[..=t]` and indicators up to t, pending for bar t+1

pub mod ledger;
pub mod simulator;

pub use ledger::{Fill, Ledger};
pub use simulator::{simulate, simulate_from, SimConfig, Simulation, MIN_BARS};
