//! Walk-forward scenarios.

mod common;

use std::sync::atomic::AtomicBool;

use common::{rising, wave, Cliff};
use stratlab_core::strategy::MaCrossover;
use stratlab_core::{ParamValue, SimConfig, SimError};
use stratlab_runner::{
    run_walk_forward, ParamRange, ParamSpace, RangeOverride, SearchConfig, SearchMethod,
    WalkForwardConfig, WalkForwardError, WindowMode,
};

fn small_space() -> ParamSpace {
    ParamSpace::for_strategy(&MaCrossover)
        .with_override(&RangeOverride {
            name: "fast".into(),
            range: ParamRange::Int {
                min: 3,
                max: 9,
                step: 3,
            },
        })
        .unwrap()
        .with_override(&RangeOverride {
            name: "slow".into(),
            range: ParamRange::Int {
                min: 20,
                max: 40,
                step: 10,
            },
        })
        .unwrap()
        .with_fixed("ma_type", &ParamValue::from("sma"))
        .unwrap()
}

fn wf(train: usize, test: usize, mode: WindowMode) -> WalkForwardConfig {
    WalkForwardConfig {
        train_length: train,
        test_length: test,
        mode,
        ..WalkForwardConfig::default()
    }
}

#[test]
fn block_mode_on_250_bars_runs_two_windows() {
    // GIVEN: 250 bars, 100 in-sample / 20 out-of-sample, disjoint windows
    let bars = wave(250);

    // WHEN: walk-forward runs
    let summary = run_walk_forward(
        &bars,
        &MaCrossover,
        &small_space(),
        &SimConfig::default(),
        &SearchConfig::default(),
        &wf(100, 20, WindowMode::Block),
        None,
    )
    .unwrap();

    // THEN: two complete windows, ten bars discarded
    assert_eq!(summary.planned_windows, 2);
    assert_eq!(summary.completed_windows(), 2);
    assert_eq!(summary.discarded_bars, 10);
    assert_eq!(summary.windows[0].in_sample_range.start, 0);
    assert_eq!(summary.windows[0].out_sample_range.end, 120);
    assert_eq!(summary.windows[1].in_sample_range.start, 120);
    assert_eq!(summary.windows[1].out_sample_range.end, 240);
    assert!(!summary.cancelled);
}

#[test]
fn rolling_mode_tiles_out_of_sample_segments() {
    // GIVEN: the same data in rolling mode
    let bars = wave(250);

    let summary = run_walk_forward(
        &bars,
        &MaCrossover,
        &small_space(),
        &SimConfig::default(),
        &SearchConfig::default(),
        &wf(100, 20, WindowMode::Rolling),
        None,
    )
    .unwrap();

    // THEN: seven windows in index order with back-to-back test segments
    assert_eq!(summary.completed_windows(), 7);
    assert_eq!(summary.discarded_bars, 10);
    for (i, w) in summary.windows.iter().enumerate() {
        assert_eq!(w.window_index, i);
        assert_eq!(w.out_sample_range.start, w.in_sample_range.end);
        assert_eq!(w.out_sample_range.end - w.out_sample_range.start, 20);
        assert!(w.in_sample_range.end_time < w.out_sample_range.start_time);
        assert_eq!(w.best_params.get_choice("ma_type").unwrap(), "sma");
    }
    for pair in summary.windows.windows(2) {
        assert_eq!(pair[0].out_sample_range.end, pair[1].out_sample_range.start);
    }

    // AND: aggregates are consistent with the windows
    let mean_oos = summary
        .windows
        .iter()
        .map(|w| w.out_sample_metrics.sharpe_ratio)
        .sum::<f64>()
        / 7.0;
    assert!((summary.mean_oos_sharpe - mean_oos).abs() < 1e-12);
    let compounded = summary
        .windows
        .iter()
        .fold(1.0, |acc, w| acc * (1.0 + w.out_sample_metrics.total_return))
        - 1.0;
    assert!((summary.compounded_oos_return - compounded).abs() < 1e-12);
}

#[test]
fn lead_in_lets_slow_indicators_trade_short_test_segments() {
    // GIVEN: a rising series and a slow MA longer than the test segment
    let bars = rising(200);
    let config = wf(100, 20, WindowMode::Block);

    // WHEN: run with and without in-sample lead-in
    let with_lead_in = run_walk_forward(
        &bars,
        &MaCrossover,
        &small_space(),
        &SimConfig::frictionless(10_000.0),
        &SearchConfig::default(),
        &config,
        None,
    )
    .unwrap();
    let without = run_walk_forward(
        &bars,
        &MaCrossover,
        &small_space(),
        &SimConfig::frictionless(10_000.0),
        &SearchConfig::default(),
        &WalkForwardConfig {
            oos_lead_in: false,
            ..config
        },
        None,
    )
    .unwrap();

    // THEN: with lead-in the OOS segment is invested from its first bar
    for w in &with_lead_in.windows {
        assert!(w.out_sample_metrics.total_return > 0.0);
    }
    // AND: without it the slow MA never warms up inside 20 bars
    for w in &without.windows {
        assert_eq!(w.out_sample_metrics.total_return, 0.0);
        assert_eq!(w.out_sample_metrics.num_trades, 0);
    }
}

#[test]
fn insufficient_history_is_reported() {
    let bars = wave(119);
    let err = run_walk_forward(
        &bars,
        &MaCrossover,
        &small_space(),
        &SimConfig::default(),
        &SearchConfig::default(),
        &wf(100, 20, WindowMode::Rolling),
        None,
    )
    .unwrap_err();
    assert_eq!(
        err,
        WalkForwardError::Sim(SimError::InsufficientData {
            required: 120,
            actual: 119
        })
    );
}

#[test]
fn failing_window_is_recorded_and_others_complete() {
    // GIVEN: a strategy that errors once prices pass 150
    let bars = rising(250); // closes 100.0 .. 174.7
    let strategy = Cliff { limit: 150.0 };
    let space = ParamSpace::for_strategy(&strategy);

    // WHEN: two block windows run
    let summary = run_walk_forward(
        &bars,
        &strategy,
        &space,
        &SimConfig::default(),
        &SearchConfig::default(),
        &wf(100, 20, WindowMode::Block),
        None,
    )
    .unwrap();

    // THEN: window 0 completes, window 1 fails in-sample
    assert_eq!(summary.completed_windows(), 1);
    assert_eq!(summary.failed_windows(), 1);
    assert_eq!(summary.windows[0].window_index, 0);
    assert_eq!(summary.failures[0].window_index, 1);
    assert!(summary.failures[0].error.contains("no in-sample candidate"));
}

#[test]
fn random_search_windows_are_deterministic() {
    let bars = wave(300);
    let search = SearchConfig {
        method: SearchMethod::Random,
        n_trials: 8,
        seed: 77,
        ..SearchConfig::default()
    };
    let config = wf(120, 30, WindowMode::Rolling);
    let run = |threads| {
        run_walk_forward(
            &bars,
            &MaCrossover,
            &small_space(),
            &SimConfig::default(),
            &SearchConfig {
                threads,
                ..search.clone()
            },
            &config,
            None,
        )
        .unwrap()
    };
    assert_eq!(run(Some(1)), run(Some(3)));
}

#[test]
fn cancellation_skips_every_window() {
    let bars = wave(250);
    let cancel = AtomicBool::new(true);
    let summary = run_walk_forward(
        &bars,
        &MaCrossover,
        &small_space(),
        &SimConfig::default(),
        &SearchConfig::default(),
        &wf(100, 20, WindowMode::Rolling),
        Some(&cancel),
    )
    .unwrap();
    assert!(summary.cancelled);
    assert_eq!(summary.completed_windows(), 0);
    assert!(!summary.overfit_suspected);
    assert_eq!(summary.planned_windows, 7);
}
