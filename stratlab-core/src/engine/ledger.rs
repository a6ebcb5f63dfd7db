//! Ledger — applies fills to the portfolio and closes round-trip trades.
//!
//! Handles opening, adding, reducing, closing and reversing a single position,
//! cash accounting after every fill, and trade records with quantity-weighted
//! entry/exit prices.

use chrono::NaiveDateTime;

use crate::domain::{PortfolioState, Side, Trade};

/// Quantities smaller than this are treated as flat.
pub const QTY_EPSILON: f64 = 1e-9;

/// One execution against the position.
#[derive(Debug, Clone, PartialEq)]
pub struct Fill {
    pub bar_index: usize,
    pub timestamp: NaiveDateTime,
    /// Timestamp of the bar whose signal triggered this fill.
    pub signal_time: NaiveDateTime,
    /// Signed: positive buys, negative sells.
    pub quantity: f64,
    /// Execution price, slippage included.
    pub price: f64,
    pub commission: f64,
    pub slippage: f64,
}

/// An open round trip being accumulated fill by fill.
#[derive(Debug, Clone)]
struct OpenTrade {
    side: Side,
    signal_time: NaiveDateTime,
    entry_bar: usize,
    entry_time: NaiveDateTime,
    entry_qty: f64,
    entry_notional: f64,
    exit_qty: f64,
    exit_notional: f64,
    peak_qty: f64,
    commission: f64,
    slippage: f64,
}

impl OpenTrade {
    fn close(self, exit_bar: usize, exit_time: NaiveDateTime) -> Trade {
        let avg = |notional: f64, qty: f64| if qty > 0.0 { notional / qty } else { 0.0 };
        Trade {
            side: self.side,
            signal_time: self.signal_time,
            entry_bar: self.entry_bar,
            entry_time: self.entry_time,
            entry_price: avg(self.entry_notional, self.entry_qty),
            exit_bar,
            exit_time,
            exit_price: avg(self.exit_notional, self.exit_qty),
            quantity: self.peak_qty,
            commission_paid: self.commission,
            slippage_paid: self.slippage,
            pnl: self.side.sign() * (self.exit_notional - self.entry_notional) - self.commission,
        }
    }
}

/// Portfolio plus trade bookkeeping. The simulator is its only writer.
#[derive(Debug, Clone)]
pub struct Ledger {
    state: PortfolioState,
    open: Option<OpenTrade>,
    trades: Vec<Trade>,
    total_commission: f64,
    total_slippage: f64,
}

impl Ledger {
    pub fn new(starting_cash: f64) -> Self {
        Self {
            state: PortfolioState::new(starting_cash),
            open: None,
            trades: Vec::new(),
            total_commission: 0.0,
            total_slippage: 0.0,
        }
    }

    pub fn state(&self) -> &PortfolioState {
        &self.state
    }

    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    pub fn has_open_trade(&self) -> bool {
        self.open.is_some()
    }

    pub fn total_commission(&self) -> f64 {
        self.total_commission
    }

    pub fn total_slippage(&self) -> f64 {
        self.total_slippage
    }

    /// Mark to market at `price`, returning equity.
    pub fn mark(&mut self, price: f64) -> f64 {
        self.state.mark(price)
    }

    /// Snap tiny negative cash left by float rounding back to zero.
    pub fn snap_cash(&mut self, tolerance: f64) {
        if self.state.cash < 0.0 && self.state.cash > -tolerance {
            self.state.cash = 0.0;
        }
    }

    /// Apply a single fill.
    ///
    /// A fill against the open side first reduces (and possibly closes) the
    /// current trade; any remainder opens a new trade on the other side at the
    /// same price. Costs are split pro rata between the two.
    pub fn apply(&mut self, fill: &Fill) {
        let dq = fill.quantity;
        if dq.abs() < QTY_EPSILON {
            return;
        }
        self.state.cash -= dq * fill.price + fill.commission;
        self.total_commission += fill.commission;
        self.total_slippage += fill.slippage;

        let q0 = self.state.position_quantity;
        let reducing = q0 != 0.0 && q0.signum() != dq.signum();
        let closing = if reducing { dq.abs().min(q0.abs()) } else { 0.0 };
        let opening = dq.abs() - closing;
        let close_share = closing / dq.abs();

        let mut q1 = q0 + dq;
        if q1.abs() < QTY_EPSILON {
            q1 = 0.0;
        }

        if closing > 0.0 {
            if let Some(open) = self.open.as_mut() {
                open.exit_qty += closing;
                open.exit_notional += closing * fill.price;
                open.commission += fill.commission * close_share;
                open.slippage += fill.slippage * close_share;
            }
            if q1 == 0.0 || q1.signum() != q0.signum() {
                if let Some(open) = self.open.take() {
                    self.trades.push(open.close(fill.bar_index, fill.timestamp));
                }
            }
        }

        if opening > QTY_EPSILON {
            let (commission, slippage) = (
                fill.commission * (1.0 - close_share),
                fill.slippage * (1.0 - close_share),
            );
            match self.open.as_mut() {
                Some(open) => {
                    open.entry_qty += opening;
                    open.entry_notional += opening * fill.price;
                    open.commission += commission;
                    open.slippage += slippage;
                }
                None => {
                    self.open = Some(OpenTrade {
                        side: if dq > 0.0 { Side::Long } else { Side::Short },
                        signal_time: fill.signal_time,
                        entry_bar: fill.bar_index,
                        entry_time: fill.timestamp,
                        entry_qty: opening,
                        entry_notional: opening * fill.price,
                        exit_qty: 0.0,
                        exit_notional: 0.0,
                        peak_qty: 0.0,
                        commission,
                        slippage,
                    });
                }
            }
        }

        self.state.position_avg_price = if q1 == 0.0 {
            0.0
        } else if q0 == 0.0 || q1.signum() != q0.signum() {
            fill.price
        } else if q1.abs() > q0.abs() {
            (q0.abs() * self.state.position_avg_price + opening * fill.price) / q1.abs()
        } else {
            self.state.position_avg_price
        };
        self.state.position_quantity = q1;

        if let Some(open) = self.open.as_mut() {
            open.peak_qty = open.peak_qty.max(q1.abs());
        }
    }

    /// Final portfolio state and closed trades. An open trade is dropped:
    /// its position stays in the returned state.
    pub fn into_parts(self) -> (PortfolioState, Vec<Trade>) {
        (self.state, self.trades)
    }
}
