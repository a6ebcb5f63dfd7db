//! StratLab CLI — backtest, optimize and validate strategies on CSV bar data.
//!
//! Commands:
//! - `strategies` — list registered strategies and their parameters
//! - `run` — single backtest with fixed parameters
//! - `optimize` — grid or random parameter search
//! - `walk-forward` — rolling in-sample optimization with out-of-sample checks
//! - `report` — regenerate a Markdown report from a stored result JSON
//!
//! Flags override values from `--config`.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use stratlab_core::params::ParamKind;
use stratlab_core::{Bar, ParamValue, StrategyRegistry};
use stratlab_runner::export::{save_run, to_json, windows_csv};
use stratlab_runner::report::{load_run, render_markdown, render_search, render_walk_forward};
use stratlab_runner::{
    load_bars_csv, run_backtest, run_walk_forward, search, ExperimentConfig, RunResult,
    SearchMethod, TargetMetric, WindowMode,
};

#[derive(Parser)]
#[command(
    name = "stratlab",
    about = "StratLab CLI — strategy backtesting and walk-forward optimization"
)]
struct Cli {
    /// Log filter (e.g. `debug`, `stratlab_runner=trace`). Overrides RUST_LOG.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered strategies and their parameter schemas.
    Strategies,
    /// Run one backtest with fixed parameters.
    Run {
        #[command(flatten)]
        experiment: ExperimentArgs,

        /// Write result.json, trades.csv, equity.csv and report.md here.
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// Search the parameter space for the best target metric.
    Optimize {
        #[command(flatten)]
        experiment: ExperimentArgs,

        #[command(flatten)]
        search: SearchArgs,

        /// Rows shown in the ranking.
        #[arg(long, default_value_t = 10)]
        top: usize,

        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// Walk-forward optimization.
    WalkForward {
        #[command(flatten)]
        experiment: ExperimentArgs,

        #[command(flatten)]
        search: SearchArgs,

        /// In-sample bars per window.
        #[arg(long)]
        train: Option<usize>,

        /// Out-of-sample bars per window.
        #[arg(long)]
        test: Option<usize>,

        /// Disjoint windows instead of rolling ones.
        #[arg(long, default_value_t = false)]
        block: bool,

        /// Start out-of-sample runs cold, without in-sample history.
        #[arg(long, default_value_t = false)]
        no_lead_in: bool,

        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// Regenerate a Markdown report from a stored result.json.
    Report {
        path: PathBuf,

        /// Write the report here instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(Args)]
struct ExperimentArgs {
    /// Bar CSV (timestamp/date, open, high, low, close[, volume]).
    #[arg(long)]
    data: Option<PathBuf>,

    /// Experiment TOML.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Strategy id (see `stratlab strategies`).
    #[arg(long)]
    strategy: Option<String>,

    /// Fixed parameter, repeatable: `--param fast=10`.
    #[arg(long = "param", value_name = "NAME=VALUE")]
    params: Vec<String>,

    #[arg(long)]
    cash: Option<f64>,

    #[arg(long)]
    commission: Option<f64>,

    #[arg(long)]
    slippage: Option<f64>,

    #[arg(long)]
    leverage: Option<f64>,

    #[arg(long, default_value_t = false)]
    allow_short: bool,

    #[arg(long)]
    bars_per_year: Option<f64>,
}

#[derive(Args)]
struct SearchArgs {
    #[arg(long)]
    method: Option<SearchMethod>,

    /// Random search draws.
    #[arg(long)]
    trials: Option<usize>,

    /// Grid cap.
    #[arg(long)]
    max_combinations: Option<usize>,

    #[arg(long)]
    seed: Option<u64>,

    /// sharpe, sortino, calmar, cagr, total_return, win_rate, profit_factor, max_drawdown.
    #[arg(long)]
    target: Option<TargetMetric>,

    /// Worker threads (default: all cores).
    #[arg(long)]
    threads: Option<usize>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());
    let registry = StrategyRegistry::with_builtins();

    match cli.command {
        Commands::Strategies => {
            print_strategies(&registry);
            Ok(())
        }
        Commands::Run {
            experiment,
            output_dir,
        } => run_cmd(&registry, &experiment, output_dir.as_deref()),
        Commands::Optimize {
            experiment,
            search,
            top,
            output_dir,
        } => optimize_cmd(&registry, &experiment, &search, top, output_dir.as_deref()),
        Commands::WalkForward {
            experiment,
            search,
            train,
            test,
            block,
            no_lead_in,
            output_dir,
        } => {
            let mut cfg = build_experiment(&experiment, Some(&search))?;
            if let Some(n) = train {
                cfg.walk_forward.train_length = n;
            }
            if let Some(n) = test {
                cfg.walk_forward.test_length = n;
            }
            if block {
                cfg.walk_forward.mode = WindowMode::Block;
            }
            if no_lead_in {
                cfg.walk_forward.oos_lead_in = false;
            }
            walk_forward_cmd(&registry, &cfg, output_dir.as_deref())
        }
        Commands::Report { path, output } => {
            let result = load_run(&path)?;
            let md = render_markdown(&result);
            match output {
                Some(out) => std::fs::write(&out, md)
                    .with_context(|| format!("failed to write {}", out.display()))?,
                None => print!("{md}"),
            }
            Ok(())
        }
    }
}

fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(l) => EnvFilter::new(l),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

// ─── Experiment assembly ────────────────────────────────────────────

/// `--param` values: integers, then floats, then choice strings.
fn parse_param(raw: &str) -> Result<(String, ParamValue)> {
    let Some((name, value)) = raw.split_once('=') else {
        bail!("--param expects NAME=VALUE, got '{raw}'");
    };
    let (name, value) = (name.trim(), value.trim());
    if name.is_empty() {
        bail!("--param '{raw}' has an empty name");
    }
    let value = if let Ok(i) = value.parse::<i64>() {
        ParamValue::Int(i)
    } else if let Ok(f) = value.parse::<f64>() {
        ParamValue::Float(f)
    } else {
        ParamValue::Choice(value.to_string())
    };
    Ok((name.to_string(), value))
}

fn build_experiment(args: &ExperimentArgs, search: Option<&SearchArgs>) -> Result<ExperimentConfig> {
    let mut cfg = match (&args.config, &args.strategy) {
        (Some(path), _) => ExperimentConfig::load(path)?,
        (None, Some(name)) => ExperimentConfig::for_strategy(name),
        (None, None) => bail!("one of --config or --strategy is required"),
    };
    if let Some(name) = &args.strategy {
        cfg.strategy = name.clone();
    }
    for raw in &args.params {
        let (name, value) = parse_param(raw)?;
        cfg.params.insert(name, value);
    }
    if let Some(v) = args.cash {
        cfg.costs.starting_cash = v;
    }
    if let Some(v) = args.commission {
        cfg.costs.commission_rate = v;
    }
    if let Some(v) = args.slippage {
        cfg.costs.slippage_rate = v;
    }
    if let Some(v) = args.leverage {
        cfg.costs.max_leverage = v;
    }
    if args.allow_short {
        cfg.costs.allow_short = true;
    }
    if let Some(v) = args.bars_per_year {
        cfg.search.bars_per_year = v;
    }
    if let Some(s) = search {
        if let Some(m) = s.method {
            cfg.search.method = m;
        }
        if let Some(n) = s.trials {
            cfg.search.n_trials = n;
        }
        if let Some(n) = s.max_combinations {
            cfg.search.max_combinations = n;
        }
        if let Some(seed) = s.seed {
            cfg.search.seed = seed;
        }
        if let Some(t) = s.target {
            cfg.search.target = t;
        }
        if s.threads.is_some() {
            cfg.search.threads = s.threads;
        }
    }
    if let Some(data) = &args.data {
        cfg.data = Some(data.clone());
    }
    Ok(cfg)
}

fn load_data(cfg: &ExperimentConfig) -> Result<Vec<Bar>> {
    let Some(path) = &cfg.data else {
        bail!("no bar data: pass --data or set `data` in the config");
    };
    let bars = load_bars_csv(path).with_context(|| format!("loading {}", path.display()))?;
    info!(bars = bars.len(), path = %path.display(), "loaded bar data");
    Ok(bars)
}

fn write_file(dir: &Path, name: &str, contents: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create output dir: {}", dir.display()))?;
    let path = dir.join(name);
    std::fs::write(&path, contents).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

// ─── Commands ───────────────────────────────────────────────────────

fn print_strategies(registry: &StrategyRegistry) {
    for strategy in registry.iter() {
        println!("{} — {}", strategy.name(), strategy.description());
        for spec in &strategy.schema().params {
            let range = match &spec.kind {
                ParamKind::Int {
                    min,
                    max,
                    step,
                    default,
                } => format!("int [{min}, {max}] step {step}, default {default}"),
                ParamKind::Float {
                    min,
                    max,
                    step,
                    default,
                } => format!("float [{min}, {max}] step {step}, default {default}"),
                ParamKind::Choice { options, default } => {
                    format!("one of {}, default {default}", options.join("|"))
                }
            };
            println!("    {:<12} {range}", spec.name);
        }
    }
}

fn print_summary(result: &RunResult) {
    let m = &result.metrics;
    println!("Strategy:      {} ({})", result.strategy, result.params);
    println!("Total return:  {:+.2}%", m.total_return * 100.0);
    println!("CAGR:          {:+.2}%", m.cagr * 100.0);
    println!("Sharpe:        {:.3}", m.sharpe_ratio);
    println!("Sortino:       {:.3}", m.sortino_ratio);
    println!("Max drawdown:  {:.2}%", m.max_drawdown * 100.0);
    println!("Calmar:        {:.3}", m.calmar_ratio);
    println!("Win rate:      {:.1}%", m.win_rate * 100.0);
    println!("Profit factor: {:.3}", m.profit_factor);
    println!("Trades:        {}", m.num_trades);
}

fn run_cmd(registry: &StrategyRegistry, args: &ExperimentArgs, output_dir: Option<&Path>) -> Result<()> {
    let cfg = build_experiment(args, None)?;
    let strategy = cfg.resolve(registry)?;
    let bars = load_data(&cfg)?;
    let result = run_backtest(
        &bars,
        strategy.as_ref(),
        &cfg.params,
        &cfg.costs,
        cfg.bars_per_year(),
    )?;
    print_summary(&result);
    if let Some(dir) = output_dir {
        save_run(&result, dir)?;
        println!("Artifacts saved to: {}", dir.display());
    }
    Ok(())
}

fn optimize_cmd(
    registry: &StrategyRegistry,
    args: &ExperimentArgs,
    search_args: &SearchArgs,
    top: usize,
    output_dir: Option<&Path>,
) -> Result<()> {
    let cfg = build_experiment(args, Some(search_args))?;
    let strategy = cfg.resolve(registry)?;
    let space = cfg.param_space(strategy.as_ref())?;
    let bars = load_data(&cfg)?;

    let outcome = search(&bars, strategy.as_ref(), &space, &cfg.costs, &cfg.search, None)?;
    print!("{}", render_search(&outcome, top));

    let Some(best) = &outcome.best else {
        bail!("no candidate succeeded ({} failed)", outcome.failures.len());
    };
    println!();
    print_summary(best);

    if let Some(dir) = output_dir {
        write_file(dir, "search.json", &to_json(&outcome)?)?;
        write_file(dir, "search.md", &render_search(&outcome, outcome.ranked.len()))?;
        save_run(best, &dir.join("best"))?;
        println!("Artifacts saved to: {}", dir.display());
    }
    Ok(())
}

fn walk_forward_cmd(
    registry: &StrategyRegistry,
    cfg: &ExperimentConfig,
    output_dir: Option<&Path>,
) -> Result<()> {
    let strategy = cfg.resolve(registry)?;
    let space = cfg.param_space(strategy.as_ref())?;
    let bars = load_data(cfg)?;

    let summary = run_walk_forward(
        &bars,
        strategy.as_ref(),
        &space,
        &cfg.costs,
        &cfg.search,
        &cfg.walk_forward,
        None,
    )?;
    let report = render_walk_forward(&summary);
    print!("{report}");

    if let Some(dir) = output_dir {
        write_file(dir, "walk_forward.json", &to_json(&summary)?)?;
        write_file(dir, "windows.csv", &windows_csv(&summary.windows)?)?;
        write_file(dir, "walk_forward.md", &report)?;
        println!("Artifacts saved to: {}", dir.display());
    }
    if summary.completed_windows() == 0 {
        bail!("no walk-forward window completed");
    }
    Ok(())
}
