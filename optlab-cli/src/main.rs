//! OptLab CLI: optimize, retest, screen, compare and grid commands.
//!
//! Commands:
//! - `optimize-strategy`: full Stage 0–4 sweep for one ticker and regime
//! - `retest`: re-score a previous Top-10 payload against a fresh chain
//! - `screen`: sweep several symbols and rank them by best score
//! - `compare`: moving-average stock strategy versus a momentum long call
//! - `grid`: sweep compare parameters and rank the points by an objective
//!
//! Results go to stdout as JSON; logs go to stderr. Exit codes: 0 success
//! (including zero survivors), 1 validation, 2 data unavailable, 3 runtime.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use optlab_core::data::{CsvProvider, FallbackChain, RetryPolicy, SyntheticProvider};
use optlab_runner::{
    CompareRequest, ConfigError, ErrorKind, GridRequest, ObjectiveWeights, OptimizeError, OptimizeRequest,
    OptimizeResponse, Optimizer, OptimizerConfig, ScreenRequest, StockBasic,
};

/// Synthetic data seed when the config carries no master seed.
const DEFAULT_SYNTHETIC_SEED: u64 = 42;

#[derive(Parser)]
#[command(name = "optlab", about = "OptLab CLI: option structure optimizer")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct CommonArgs {
    /// Path to a TOML config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Config override, e.g. `--override mc.num_paths=8000`. Repeatable.
    #[arg(long = "override", global = true, value_name = "SECTION.KEY=VALUE")]
    overrides: Vec<String>,

    /// Directory with `<SYMBOL>.csv` history and `<SYMBOL>_chain.csv` quotes.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Append seeded synthetic data to the provider chain.
    #[arg(long, global = true, default_value_t = false)]
    synthetic: bool,

    /// Pretty-print the JSON output.
    #[arg(long, global = true, default_value_t = false)]
    pretty: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full funnel and Monte Carlo scoring for one ticker.
    OptimizeStrategy {
        /// Underlying symbol (e.g., SPY).
        #[arg(long)]
        ticker: String,

        /// Regime label from the config (e.g., neutral, mild-bullish).
        #[arg(long, default_value = "neutral")]
        regime: String,

        /// Trade horizon in trading days (1-30).
        #[arg(long, default_value_t = 10)]
        horizon: usize,

        /// As-of date (YYYY-MM-DD). Defaults to today.
        #[arg(long)]
        as_of: Option<String>,

        /// Label seeding the run id; defaults to ticker:regime:horizon:as_of.
        #[arg(long)]
        run_label: Option<String>,
    },
    /// Re-score the Top-10 of a previous optimize-strategy response.
    Retest {
        /// Previous response JSON; `-` reads stdin.
        #[arg(long)]
        payload: PathBuf,

        /// As-of date for the fresh chain (YYYY-MM-DD). Defaults to today.
        #[arg(long)]
        as_of: Option<String>,
    },
    /// Sweep several symbols and rank them by their best candidate.
    Screen {
        /// Symbols to screen (e.g., SPY QQQ IWM).
        #[arg(required = true)]
        symbols: Vec<String>,

        #[arg(long, default_value = "neutral")]
        regime: String,

        #[arg(long, default_value_t = 10)]
        horizon: usize,

        #[arg(long)]
        as_of: Option<String>,

        /// Keep only the best N symbols.
        #[arg(long)]
        top_n: Option<usize>,
    },
    /// Compare a moving-average stock strategy with a momentum long call.
    Compare(CompareArgs),
    /// Sweep stock windows and call strikes, ranking points by a weighted objective.
    Grid {
        #[command(flatten)]
        base: CompareArgs,

        /// Short windows to sweep, comma separated.
        #[arg(long, value_delimiter = ',')]
        short_windows: Vec<usize>,

        /// Long windows to sweep, comma separated.
        #[arg(long, value_delimiter = ',')]
        long_windows: Vec<usize>,

        /// Call strikes to sweep, comma separated.
        #[arg(long, value_delimiter = ',')]
        strikes: Vec<f64>,

        /// Objective weights: mean PnL, Sharpe, max drawdown, CVaR.
        #[arg(long, value_delimiter = ',', default_values_t = [0.3, 0.3, 0.2, 0.2])]
        weights: Vec<f64>,
    },
}

#[derive(Args)]
struct CompareArgs {
    #[arg(long, default_value = "neutral")]
    regime: String,

    /// Initial spot.
    #[arg(long, default_value_t = 100.0)]
    s0: f64,

    #[arg(long, default_value_t = 1000)]
    paths: usize,

    /// Trading days simulated per path.
    #[arg(long, default_value_t = 60)]
    steps: usize,

    /// Call strike; at the money when omitted.
    #[arg(long)]
    strike: Option<f64>,

    /// Trading days to the call's expiry.
    #[arg(long, default_value_t = 30)]
    maturity_days: u32,

    /// Annualized implied vol of the call.
    #[arg(long, default_value_t = 0.2)]
    iv: f64,

    #[arg(long, default_value_t = 5)]
    short_window: usize,

    #[arg(long, default_value_t = 20)]
    long_window: usize,
}

impl CompareArgs {
    fn into_request(self) -> CompareRequest {
        CompareRequest {
            n_paths: self.paths,
            n_steps: self.steps,
            strike: self.strike,
            maturity_days: self.maturity_days,
            implied_vol: self.iv,
            stock: StockBasic {
                short_window: self.short_window,
                long_window: self.long_window,
            },
            ..CompareRequest::new(self.regime, self.s0)
        }
    }
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(exit_code(&err))
        }
    }
}

/// `RUST_LOG` filter, `info` by default, written to stderr.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let config = OptimizerConfig::load(cli.common.config.as_deref(), std::env::vars(), &cli.common.overrides)
        .context("failed to resolve configuration")?;
    let data = build_data_chain(&cli.common, &config);
    let optimizer = Optimizer::new(&config, &data)?;

    match cli.command {
        Commands::OptimizeStrategy {
            ticker,
            regime,
            horizon,
            as_of,
            run_label,
        } => {
            let mut request = OptimizeRequest::new(ticker, regime, horizon, parse_as_of(as_of.as_deref())?);
            request.run_label = run_label;
            let response = optimizer.optimize_strategy(&request)?;
            log_summary(&response);
            emit(&response, cli.common.pretty)
        }
        Commands::Retest { payload, as_of } => {
            let previous = read_payload(&payload)?;
            let response = optimizer.retest(&previous, parse_as_of(as_of.as_deref())?)?;
            log_summary(&response);
            emit(&response, cli.common.pretty)
        }
        Commands::Screen {
            symbols,
            regime,
            horizon,
            as_of,
            top_n,
        } => {
            let request = ScreenRequest {
                symbols,
                regime,
                horizon,
                as_of: parse_as_of(as_of.as_deref())?,
                top_n,
            };
            let report = optimizer.screen(&request)?;
            for failure in &report.failures {
                warn!(symbol = %failure.symbol, kind = ?failure.kind, "{}", failure.error);
            }
            emit(&report, cli.common.pretty)
        }
        Commands::Compare(args) => {
            let report = optimizer.compare(&args.into_request())?;
            info!(
                stock_sharpe = report.stock.sharpe,
                option_sharpe = report.option.sharpe,
                runtime_seconds = report.runtime_seconds,
                "compare complete"
            );
            emit(&report, cli.common.pretty)
        }
        Commands::Grid {
            base,
            short_windows,
            long_windows,
            strikes,
            weights,
        } => {
            let [mean_pnl, sharpe, max_drawdown, cvar] = <[f64; 4]>::try_from(weights)
                .map_err(|w| anyhow::anyhow!("--weights needs exactly four values, got {}", w.len()))?;
            let request = GridRequest {
                base: base.into_request(),
                short_windows,
                long_windows,
                strikes,
                weights: ObjectiveWeights {
                    mean_pnl,
                    sharpe,
                    max_drawdown,
                    cvar,
                },
            };
            let report = optimizer.grid(&request)?;
            for entry in report.entries.iter().filter(|e| e.error.is_some()) {
                warn!(index = entry.index, "grid point failed: {}", entry.error.as_deref().unwrap_or_default());
            }
            emit(&report, cli.common.pretty)
        }
    }
}

/// CSV first when a data dir is given; synthetic with `--synthetic` or when
/// nothing else is configured.
fn build_data_chain(args: &CommonArgs, config: &OptimizerConfig) -> FallbackChain {
    let mut chain = FallbackChain::new(RetryPolicy::default());
    if let Some(dir) = &args.data_dir {
        chain = chain.with_provider(Arc::new(CsvProvider::new(dir)));
    }
    if args.synthetic || args.data_dir.is_none() {
        let seed = config.mc.seed.unwrap_or(DEFAULT_SYNTHETIC_SEED);
        chain = chain.with_provider(Arc::new(SyntheticProvider::new(seed)));
    }
    info!(providers = ?chain.provider_names(), "data chain ready");
    chain
}

fn parse_as_of(raw: Option<&str>) -> Result<NaiveDate> {
    match raw {
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d").with_context(|| format!("invalid --as-of date '{s}'")),
        None => Ok(chrono::Local::now().date_naive()),
    }
}

fn read_payload(path: &Path) -> Result<OptimizeResponse> {
    let text = if path == Path::new("-") {
        std::io::read_to_string(std::io::stdin()).context("failed to read payload from stdin")?
    } else {
        std::fs::read_to_string(path).with_context(|| format!("failed to read payload {}", path.display()))?
    };
    serde_json::from_str(&text).context("payload is not a previous optimize-strategy response")
}

fn emit<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let json = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{json}");
    Ok(())
}

fn log_summary(response: &OptimizeResponse) {
    info!(
        symbol = %response.symbol,
        regime = %response.regime,
        candidates = response.top10.len(),
        best = ?response.best_score(),
        runtime_seconds = response.runtime_seconds,
        "run complete"
    );
    for hint in &response.diagnostics.hints {
        info!("hint: {hint}");
    }
}

/// Optimizer errors by kind; config and input errors are validation; anything
/// else is a runtime failure.
fn exit_code(err: &anyhow::Error) -> u8 {
    let kind = err.chain().find_map(|cause| {
        if let Some(e) = cause.downcast_ref::<OptimizeError>() {
            Some(e.kind())
        } else if cause.is::<ConfigError>() || cause.is::<serde_json::Error>() || cause.is::<chrono::ParseError>() {
            Some(ErrorKind::Validation)
        } else if cause.is::<std::io::Error>() {
            Some(ErrorKind::Validation)
        } else {
            None
        }
    });
    kind.unwrap_or(ErrorKind::Runtime).exit_code() as u8
}
