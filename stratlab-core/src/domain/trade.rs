//! Trade — a completed round trip from open to flat (or reversal).

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Direction of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// +1 for long, -1 for short.
    pub fn sign(&self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }

    /// Side implied by a signed quantity, `None` when flat.
    pub fn of_quantity(quantity: f64) -> Option<Self> {
        if quantity > 0.0 {
            Some(Side::Long)
        } else if quantity < 0.0 {
            Some(Side::Short)
        } else {
            None
        }
    }
}

/// A completed round-trip trade.
///
/// When a position is resized mid-trade, `entry_price` and `exit_price` are
/// quantity-weighted averages and `quantity` is the peak absolute quantity.
/// `pnl` is net of commission and slippage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub side: Side,

    // ── Signal ──
    /// Timestamp of the bar whose signal opened this trade.
    pub signal_time: NaiveDateTime,

    // ── Entry ──
    pub entry_bar: usize,
    pub entry_time: NaiveDateTime,
    pub entry_price: f64,

    // ── Exit ──
    pub exit_bar: usize,
    pub exit_time: NaiveDateTime,
    pub exit_price: f64,

    // ── Size and costs ──
    pub quantity: f64,
    pub commission_paid: f64,
    pub slippage_paid: f64,
    pub pnl: f64,
}

impl Trade {
    /// Return on the trade as a fraction of entry notional.
    pub fn return_pct(&self) -> f64 {
        let notional = self.entry_price * self.quantity;
        if notional == 0.0 {
            return 0.0;
        }
        self.pnl / notional
    }

    pub fn is_winner(&self) -> bool {
        self.pnl > 0.0
    }

    pub fn bars_held(&self) -> usize {
        self.exit_bar.saturating_sub(self.entry_bar)
    }
}
