//! End-to-end simulator scenarios on synthetic series.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::NaiveDate;
use stratlab_core::indicators::{Indicator, IndicatorView, Sma};
use stratlab_core::strategy::evaluate_window;
use stratlab_core::{
    simulate, Bar, ParamSchema, ParamSet, SimConfig, SimError, Side, Signal, Strategy,
    StrategyError, StrategyRegistry,
};

fn bars_from_closes(closes: &[f64]) -> Vec<Bar> {
    let base = NaiveDate::from_ymd_opt(2023, 1, 2)
        .unwrap()
        .and_hms_opt(16, 0, 0)
        .unwrap();
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open = if i == 0 { close } else { closes[i - 1] };
            Bar {
                timestamp: base + chrono::Duration::days(i as i64),
                open,
                high: open.max(close),
                low: open.min(close),
                close,
                volume: 10_000.0,
            }
        })
        .collect()
}

fn sine_closes(n: usize) -> Vec<f64> {
    (0..n)
        .map(|i| 100.0 + (i as f64 / 8.0).sin() * 15.0)
        .collect()
}

#[test]
fn flat_prices_without_costs_leave_equity_unchanged() {
    // GIVEN: a flat price series and a frictionless config
    let bars = bars_from_closes(&[50.0; 40]);
    let registry = StrategyRegistry::with_builtins();
    let config = SimConfig::frictionless(25_000.0);

    for strategy in registry.iter() {
        // WHEN: any built-in strategy runs on it
        let sim = simulate(&bars, strategy.as_ref(), &ParamSet::new(), &config).unwrap();

        // THEN: equity never moves
        assert!(
            sim.equity_curve.values().iter().all(|e| (e - 25_000.0).abs() < 1e-6),
            "{}",
            strategy.name()
        );
    }
}

#[test]
fn ma_crossover_on_rising_series_never_loses() {
    // GIVEN: a strictly increasing series
    let closes: Vec<f64> = (0..250).map(|i| 100.0 * 1.002_f64.powi(i)).collect();
    let bars = bars_from_closes(&closes);
    let registry = StrategyRegistry::with_builtins();
    let strategy = registry.get("ma_crossover").unwrap();

    for ma_type in ["sma", "ema"] {
        let params = ParamSet::new()
            .with("fast", 5)
            .with("slow", 30)
            .with("ma_type", ma_type);

        // WHEN: simulated with default costs
        let sim = simulate(&bars, strategy.as_ref(), &params, &SimConfig::default()).unwrap();

        // THEN: no closed trade lost money and the position is still open
        assert!(sim.trades.iter().all(|t| t.pnl >= 0.0), "{ma_type}");
        assert!(sim.final_state.position_quantity > 0.0);
        assert!(sim.final_state.equity > 100_000.0);
    }
}

#[test]
fn identical_inputs_give_identical_runs() {
    let bars = bars_from_closes(&sine_closes(300));
    let registry = StrategyRegistry::with_builtins();
    let strategy = registry.get("rsi_threshold").unwrap();
    let params = ParamSet::new().with("period", 8);
    let config = SimConfig {
        commission_rate: 0.0005,
        ..SimConfig::default()
    };

    let a = simulate(&bars, strategy.as_ref(), &params, &config).unwrap();
    let b = simulate(&bars, strategy.as_ref(), &params, &config).unwrap();
    assert_eq!(a, b);
    assert!(!a.trades.is_empty());
}

#[test]
fn oscillating_series_round_trips_through_trades() {
    // GIVEN: a sine wave long enough for several crossovers
    let bars = bars_from_closes(&sine_closes(400));
    let registry = StrategyRegistry::with_builtins();
    let strategy = registry.get("ma_crossover").unwrap();
    let params = ParamSet::new().with("fast", 3).with("slow", 10);
    let config = SimConfig::frictionless(10_000.0);

    // WHEN: simulated
    let sim = simulate(&bars, strategy.as_ref(), &params, &config).unwrap();

    // THEN: every closed trade is long, positive size, in time order
    assert!(sim.trades.len() >= 3);
    for pair in sim.trades.windows(2) {
        assert!(pair[1].entry_bar >= pair[0].exit_bar);
    }
    for trade in &sim.trades {
        assert_eq!(trade.side, Side::Long);
        assert!(trade.quantity > 0.0);
        assert!(trade.bars_held() >= 1);
    }

    // AND: with no costs, realized PnL plus the open position explains final equity
    let realized: f64 = sim.trades.iter().map(|t| t.pnl).sum();
    let state = sim.final_state;
    let last_close = bars.last().unwrap().close;
    let unrealized = state.position_quantity * (last_close - state.position_avg_price);
    assert!((10_000.0 + realized + unrealized - state.equity).abs() < 1e-6);
}

#[test]
fn momentum_shorts_only_when_enabled() {
    let closes: Vec<f64> = (0..120).map(|i| 200.0 - i as f64).collect();
    let bars = bars_from_closes(&closes);
    let registry = StrategyRegistry::with_builtins();
    let strategy = registry.get("momentum").unwrap();
    let params = ParamSet::new()
        .with("lookback", 10)
        .with("allow_short", "yes");

    let disabled = simulate(&bars, strategy.as_ref(), &params, &SimConfig::default()).unwrap();
    assert!(disabled.final_state.is_flat());
    assert!(disabled.rejected_signals > 0);

    let enabled = SimConfig {
        allow_short: true,
        ..SimConfig::default()
    };
    let sim = simulate(&bars, strategy.as_ref(), &params, &enabled).unwrap();
    assert!(sim.final_state.position_quantity < 0.0);
    assert_eq!(sim.rejected_signals, 0);
    assert!(sim.final_state.equity > 100_000.0);
}

#[test]
fn commissions_reduce_equity() {
    let bars = bars_from_closes(&sine_closes(200));
    let registry = StrategyRegistry::with_builtins();
    let strategy = registry.get("ma_crossover").unwrap();
    let params = ParamSet::new().with("fast", 3).with("slow", 10);

    let free = simulate(&bars, strategy.as_ref(), &params, &SimConfig::frictionless(10_000.0)).unwrap();
    let costly = SimConfig {
        commission_rate: 0.002,
        slippage_rate: 0.001,
        ..SimConfig::frictionless(10_000.0)
    };
    let paid = simulate(&bars, strategy.as_ref(), &params, &costly).unwrap();

    assert!(paid.total_commission > 0.0);
    assert!(paid.total_slippage > 0.0);
    assert!(paid.final_state.equity < free.final_state.equity);
}

#[test]
fn invalid_params_are_rejected_before_simulating() {
    let bars = bars_from_closes(&sine_closes(50));
    let registry = StrategyRegistry::with_builtins();
    let strategy = registry.get("ma_crossover").unwrap();
    let params = ParamSet::new().with("fast", 30).with("slow", 20);

    let err = simulate(&bars, strategy.as_ref(), &params, &SimConfig::default()).unwrap_err();
    assert!(matches!(err, SimError::InvalidConfig(_)));
}

#[test]
fn void_bar_mid_series_does_not_liquidate_ema_crossover() {
    // GIVEN: a rising series with one void bar (every price blank) at index 60
    let closes: Vec<f64> = (0..300).map(|i| 100.0 + i as f64 * 0.5).collect();
    let mut bars = bars_from_closes(&closes);
    let void = &mut bars[60];
    void.open = f64::NAN;
    void.high = f64::NAN;
    void.low = f64::NAN;
    void.close = f64::NAN;
    let registry = StrategyRegistry::with_builtins();
    let strategy = registry.get("ma_crossover").unwrap();
    let params = ParamSet::new()
        .with("fast", 5)
        .with("slow", 20)
        .with("ma_type", "ema");

    // WHEN: simulated without costs
    let sim = simulate(&bars, strategy.as_ref(), &params, &SimConfig::frictionless(10_000.0)).unwrap();

    // THEN: the position opened in the warmup is still held at the end
    assert!(sim.trades.is_empty(), "{:?}", sim.trades);
    assert!(sim.final_state.position_quantity > 0.0);
    assert_eq!(sim.unfilled_signals, 0);
    assert!(sim.equity_curve.values().iter().all(|e| e.is_finite()));
}

/// SMA that counts full-series computations.
struct CountingSma {
    inner: Sma,
    calls: Arc<AtomicUsize>,
}

impl Indicator for CountingSma {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn lookback(&self) -> usize {
        self.inner.lookback()
    }

    fn compute(&self, bars: &[Bar]) -> Vec<f64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.compute(bars)
    }
}

/// Long once its SMA has warmed up.
struct SmaWarm {
    calls: Arc<AtomicUsize>,
}

impl Strategy for SmaWarm {
    fn name(&self) -> &str {
        "sma_warm"
    }

    fn schema(&self) -> ParamSchema {
        ParamSchema::default()
    }

    fn generate_signal(&self, window: &[Bar], params: &ParamSet) -> Result<Signal, StrategyError> {
        evaluate_window(self, window, params)
    }

    fn indicators(&self, _: &ParamSet) -> Result<Vec<Box<dyn Indicator>>, StrategyError> {
        Ok(vec![Box::new(CountingSma {
            inner: Sma::new(5),
            calls: Arc::clone(&self.calls),
        })])
    }

    fn evaluate(
        &self,
        _: &[Bar],
        indicators: &IndicatorView<'_>,
        _: &ParamSet,
    ) -> Result<Signal, StrategyError> {
        Ok(match indicators.latest("sma_5") {
            Some(_) => Signal::Long,
            None => Signal::Flat,
        })
    }
}

#[test]
fn indicators_are_computed_once_per_simulation() {
    for n in [50, 500, 5_000] {
        // GIVEN: a strategy whose indicator counts its computations
        let calls = Arc::new(AtomicUsize::new(0));
        let strategy = SmaWarm {
            calls: Arc::clone(&calls),
        };
        let bars = bars_from_closes(&sine_closes(n));

        // WHEN: simulated over n bars
        let sim = simulate(&bars, &strategy, &ParamSet::new(), &SimConfig::default()).unwrap();

        // THEN: the series was computed once, not once per bar
        assert_eq!(calls.load(Ordering::SeqCst), 1, "n = {n}");
        assert!(sim.final_state.position_quantity > 0.0);
    }
}
