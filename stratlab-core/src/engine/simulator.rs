//! Bar loop, signal-to-order sizing and cost model.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use super::ledger::{Fill, Ledger, QTY_EPSILON};
use crate::domain::{check_ordering, Bar, EquityCurve, PortfolioState, Side, Trade};
use crate::error::{ConfigError, SimError};
use crate::indicators::{precompute, IndicatorValues};
use crate::params::ParamSet;
use crate::strategy::{Signal, Strategy};

/// Fewest bars a simulation can trade: one to signal, one to fill.
pub const MIN_BARS: usize = 2;

/// Negative cash within this many currency units is float noise.
const CASH_TOLERANCE: f64 = 1e-6;

// ─── Config ──────────────────────────────────────────────────────────

/// Cost and exposure assumptions for one simulation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub starting_cash: f64,
    /// Fraction of fill notional charged per fill.
    pub commission_rate: f64,
    /// Fraction of price paid on buys and given up on sells.
    pub slippage_rate: f64,
    /// Borrowing allowed beyond equity: post-fill `cash >= -max_leverage * equity`.
    pub max_leverage: f64,
    pub allow_short: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            starting_cash: 100_000.0,
            commission_rate: 0.0,
            slippage_rate: 0.0005,
            max_leverage: 0.0,
            allow_short: false,
        }
    }
}

impl SimConfig {
    /// Zero commission and zero slippage.
    pub fn frictionless(starting_cash: f64) -> Self {
        Self {
            starting_cash,
            commission_rate: 0.0,
            slippage_rate: 0.0,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.starting_cash.is_finite() || self.starting_cash < 0.0 {
            return Err(ConfigError::NegativeCash(self.starting_cash));
        }
        for (name, value) in [
            ("commission_rate", self.commission_rate),
            ("slippage_rate", self.slippage_rate),
        ] {
            if !(0.0..1.0).contains(&value) {
                return Err(ConfigError::RateOutOfRange { name, value });
            }
        }
        if !self.max_leverage.is_finite() || self.max_leverage < 0.0 {
            return Err(ConfigError::InvalidLeverage(self.max_leverage));
        }
        Ok(())
    }

    /// Largest absolute target weight a strategy may request.
    pub fn max_weight(&self) -> f64 {
        1.0 + self.max_leverage
    }
}

// ─── Result ──────────────────────────────────────────────────────────

/// Raw output of one simulation, before metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Simulation {
    /// Parameters after schema defaults were filled in.
    pub params: ParamSet,
    /// One point for the initial state plus one per traded bar.
    pub equity_curve: EquityCurve,
    /// Closed round trips; an open position at the end is not included.
    pub trades: Vec<Trade>,
    pub final_state: PortfolioState,
    /// Short signals turned into FLAT because shorting is disabled.
    pub rejected_signals: usize,
    /// Position changes dropped because the fill bar had no valid open.
    #[serde(default)]
    pub unfilled_signals: usize,
    /// Index of the first traded bar in the input series.
    pub start_index: usize,
    pub total_commission: f64,
    pub total_slippage: f64,
}

impl Simulation {
    pub fn bars_traded(&self) -> usize {
        self.equity_curve.len().saturating_sub(1)
    }
}

// ─── Entry points ────────────────────────────────────────────────────

/// Simulate `strategy` over every bar.
pub fn simulate(
    bars: &[Bar],
    strategy: &dyn Strategy,
    params: &ParamSet,
    config: &SimConfig,
) -> Result<Simulation, SimError> {
    simulate_from(bars, 0, strategy, params, config)
}

/// Simulate `strategy` trading only `bars[start..]`.
///
/// Earlier bars are history: the strategy sees them in its window, and the
/// signal computed at the close of `bars[start - 1]` executes at the open of
/// `bars[start]`, but no fill and no equity point falls before `start`.
pub fn simulate_from(
    bars: &[Bar],
    start: usize,
    strategy: &dyn Strategy,
    params: &ParamSet,
    config: &SimConfig,
) -> Result<Simulation, SimError> {
    config.validate()?;
    let required = start.saturating_add(MIN_BARS);
    if bars.len() < required {
        return Err(SimError::InsufficientData {
            required,
            actual: bars.len(),
        });
    }
    check_ordering(bars)?;
    let params = strategy.resolve_params(params)?;
    let indicators = strategy
        .indicators(&params)
        .map_err(|source| SimError::Strategy {
            bar_index: start,
            source,
        })?;
    let indicators = precompute(bars, &indicators);

    let mut run = Run {
        bars,
        strategy,
        params: &params,
        indicators: &indicators,
        config,
        ledger: Ledger::new(config.starting_cash),
        rejected_signals: 0,
        unfilled_signals: 0,
    };

    let mut equity_curve = EquityCurve::with_capacity(bars.len() - start + 1);
    equity_curve.push(bars[start].timestamp, config.starting_cash);

    let mut pending = if start > 0 {
        Some((run.signal_at(start - 1)?, start - 1))
    } else {
        None
    };
    let mut last_close: Option<f64> = None;

    for t in start..bars.len() {
        let bar = &bars[t];

        // ─── Open: execute yesterday's signal ───
        if let Some((signal, signal_bar)) = pending.take() {
            run.execute(signal, signal_bar, t)?;
        }

        // ─── Close: mark to market ───
        if bar.close.is_finite() {
            last_close = Some(bar.close);
        }
        let mark = last_close.unwrap_or(run.ledger.state().position_avg_price);
        let equity = run.ledger.mark(mark);
        equity_curve.push(bar.timestamp, equity);

        // ─── Signal: decided on bars[..=t], executed at t+1 ───
        if t + 1 < bars.len() {
            pending = Some((run.signal_at(t)?, t));
        }
    }

    let rejected_signals = run.rejected_signals;
    let unfilled_signals = run.unfilled_signals;
    let total_commission = run.ledger.total_commission();
    let total_slippage = run.ledger.total_slippage();
    let (final_state, trades) = run.ledger.into_parts();

    trace!(
        strategy = strategy.name(),
        params = %params,
        bars = bars.len() - start,
        trades = trades.len(),
        final_equity = final_state.equity,
        rejected_signals,
        unfilled_signals,
        "simulation complete"
    );

    Ok(Simulation {
        params,
        equity_curve,
        trades,
        final_state,
        rejected_signals,
        unfilled_signals,
        start_index: start,
        total_commission,
        total_slippage,
    })
}

// ─── Bar loop state ──────────────────────────────────────────────────

struct Run<'a> {
    bars: &'a [Bar],
    strategy: &'a dyn Strategy,
    params: &'a ParamSet,
    indicators: &'a IndicatorValues,
    config: &'a SimConfig,
    ledger: Ledger,
    rejected_signals: usize,
    unfilled_signals: usize,
}

impl Run<'_> {
    /// Evaluate the strategy on the truncated window ending at bar `t`.
    fn signal_at(&self, t: usize) -> Result<Signal, SimError> {
        self.strategy
            .evaluate(&self.bars[..=t], &self.indicators.view(t), self.params)
            .map_err(|source| SimError::Strategy {
                bar_index: t,
                source,
            })
    }

    /// Turn the signal from `signal_bar` into a fill at the open of bar `t`.
    fn execute(&mut self, signal: Signal, signal_bar: usize, t: usize) -> Result<(), SimError> {
        let bar = &self.bars[t];
        let Some(requested) = signal.target_weight() else {
            return Ok(());
        };
        if !requested.is_finite() {
            return Err(SimError::Strategy {
                bar_index: signal_bar,
                source: crate::error::StrategyError::new(
                    self.strategy.name(),
                    format!("non-finite target weight {requested}"),
                ),
            });
        }
        let max_weight = self.config.max_weight();
        let mut weight = requested.clamp(-max_weight, max_weight);
        if weight < 0.0 && !self.config.allow_short {
            self.rejected_signals += 1;
            weight = 0.0;
        }

        let q0 = self.ledger.state().position_quantity;
        if (signal.is_discrete() && Side::of_quantity(q0) == Side::of_quantity(weight))
            || (weight == 0.0 && q0 == 0.0)
        {
            return Ok(());
        }

        let open = bar.open;
        if !(open.is_finite() && open > 0.0) {
            self.unfilled_signals += 1;
            warn!(bar = t, signal_bar, ?signal, "no valid open, signal dropped");
            return Ok(());
        }

        let c = self.config.commission_rate;
        let s = self.config.slippage_rate;
        let buy_price = open * (1.0 + s);
        let sell_price = open * (1.0 - s);

        let equity = self.ledger.state().equity_at(open);
        let target = if equity <= 0.0 || weight == 0.0 {
            0.0
        } else if weight > 0.0 {
            weight * equity / (buy_price * (1.0 + c))
        } else {
            weight * equity / sell_price
        };

        let mut dq = target - q0;
        if dq > 0.0 {
            dq = dq.min(self.max_buy(open, buy_price));
        }
        if dq.abs() < QTY_EPSILON {
            return Ok(());
        }

        let price = if dq > 0.0 { buy_price } else { sell_price };
        let fill = Fill {
            bar_index: t,
            timestamp: bar.timestamp,
            signal_time: self.bars[signal_bar].timestamp,
            quantity: dq,
            price,
            commission: dq.abs() * price * c,
            slippage: dq.abs() * open * s,
        };
        debug!(
            bar = t,
            quantity = fill.quantity,
            price = fill.price,
            commission = fill.commission,
            "fill"
        );
        self.ledger.apply(&fill);
        self.ledger.snap_cash(CASH_TOLERANCE);
        Ok(())
    }

    /// Largest buy keeping post-fill `cash >= -max_leverage * equity`, with
    /// equity marked at the raw open.
    fn max_buy(&self, open: f64, buy_price: f64) -> f64 {
        let state = self.ledger.state();
        let lev = self.config.max_leverage;
        let unit_cost = buy_price * (1.0 + self.config.commission_rate);
        let headroom = state.cash * (1.0 + lev) + lev * state.position_quantity * open;
        let denominator = unit_cost * (1.0 + lev) - lev * open;
        if headroom <= 0.0 || denominator <= 0.0 {
            return 0.0;
        }
        headroom / denominator
    }
}
