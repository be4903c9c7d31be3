//! KlineSync CLI: scheduled kline download and symbol-properties update.
//!
//! Commands:
//! - `download`: fetch klines every interval and write them to the Parquet dataset
//! - `update-symbols`: refresh one venue's rows in the symbol-properties database

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use klinesync_core::config::{ConfigError, JobConfig, ValidatedJob};
use klinesync_core::data::{
    update_symbol_properties, BinanceClient, CircuitBreaker, DataFetcher, DatasetWriter,
    ParquetDataset,
};
use klinesync_core::domain::Venue;
use klinesync_core::job::{
    CycleReport, CycleRequest, DownloadCycle, FireOutcome, IntervalTrigger, RecurringScheduler,
    SystemClock, TickerOutcome,
};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const USAGE_HINT: &str = "Usage: klinesync download --tickers=BTCUSDT,ETHUSDT \
--resolution=Minute|Hour|Daily|All --from-date=yyyyMMdd-HH:mm:ss \
[--to-date=yyyyMMdd-HH:mm:ss] [--destination-dir=DIR] [--venue=binance|binance-us]";

#[derive(Parser)]
#[command(
    name = "klinesync",
    about = "KlineSync CLI: recurring exchange kline download into a local bar dataset"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download klines on a recurring schedule (or once with --once).
    Download {
        /// TOML job file. Flags override its values.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Tickers to download, comma separated (e.g. BTCUSDT,ETHUSDT).
        #[arg(long, value_delimiter = ',')]
        tickers: Vec<String>,

        /// Minute, Hour, Daily, or All (minute data plus derived hour and daily).
        #[arg(long)]
        resolution: Option<String>,

        /// Start of the first window (yyyyMMdd-HH:mm:ss).
        #[arg(long)]
        from_date: Option<String>,

        /// Upper bound for every window (yyyyMMdd-HH:mm:ss). Defaults to now.
        #[arg(long)]
        to_date: Option<String>,

        /// Dataset root directory. Defaults to ./data.
        #[arg(long)]
        destination_dir: Option<PathBuf>,

        /// binance or binance-us. Defaults to binance.
        #[arg(long)]
        venue: Option<String>,

        /// Hours between firings. Defaults to 12.
        #[arg(long)]
        interval_hours: Option<u64>,

        /// Download tickers in parallel.
        #[arg(long, default_value_t = false)]
        parallel: bool,

        /// Fire on schedule even while a cycle runs (overlapping firings are dropped).
        #[arg(long, default_value_t = false)]
        no_wait: bool,

        /// Run a single cycle and exit.
        #[arg(long, default_value_t = false)]
        once: bool,

        /// Debug-level logging.
        #[arg(long, default_value_t = false)]
        debug: bool,
    },
    /// Update the symbol-properties database from a venue's exchange info.
    UpdateSymbols {
        /// binance or binance-us.
        #[arg(long, default_value = "binance")]
        venue: String,

        /// Symbol-properties CSV to update.
        #[arg(long, default_value = "data/symbol-properties/symbol-properties-database.csv")]
        output: PathBuf,

        /// Debug-level logging.
        #[arg(long, default_value_t = false)]
        debug: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Download {
            config,
            tickers,
            resolution,
            from_date,
            to_date,
            destination_dir,
            venue,
            interval_hours,
            parallel,
            no_wait,
            once,
            debug,
        } => {
            init_logging(debug)?;
            let overrides = JobConfig {
                venue,
                tickers,
                resolution,
                from_date,
                to_date,
                destination_dir,
                interval_hours,
                parallel: parallel.then_some(true),
                wait_for_completion: no_wait.then_some(false),
                once: once.then_some(true),
            };
            let job = match load_job(config, overrides) {
                Ok(job) => job,
                Err(e) => exit_with_usage(&e),
            };
            run_download(job)
        }
        Commands::UpdateSymbols {
            venue,
            output,
            debug,
        } => {
            init_logging(debug)?;
            let venue = match venue.parse::<Venue>() {
                Ok(v) => v,
                Err(e) => exit_with_usage(&ConfigError::InvalidVenue(e)),
            };
            run_update_symbols(venue, output)
        }
    }
}

fn init_logging(debug: bool) -> Result<()> {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install log subscriber: {e}"))
}

fn load_job(config: Option<PathBuf>, overrides: JobConfig) -> Result<ValidatedJob, ConfigError> {
    let file = match config {
        Some(path) => JobConfig::from_file(&path)?,
        None => JobConfig::default(),
    };
    file.merge(overrides).validate()
}

fn exit_with_usage(err: &ConfigError) -> ! {
    eprintln!("error: {err}");
    eprintln!("{USAGE_HINT}");
    std::process::exit(1);
}

fn run_download(job: ValidatedJob) -> Result<()> {
    let breaker = Arc::new(CircuitBreaker::default_venue());
    let client = BinanceClient::new(job.venue, breaker).context("failed to build HTTP client")?;
    let fetcher: Arc<dyn DataFetcher> = Arc::new(client);
    let dataset = ParquetDataset::new(&job.destination_dir);
    let destination = dataset.root().display().to_string();
    let writer: Arc<dyn DatasetWriter> = Arc::new(dataset);

    let request = CycleRequest::new(job.tickers.clone(), Some(job.resolution))
        .unwrap_or_else(|e| exit_with_usage(&e));
    let cycle = DownloadCycle::new(fetcher, writer).with_parallel(job.parallel);
    let scheduler = Arc::new(
        RecurringScheduler::new(cycle, request, job.from_date, Arc::new(SystemClock))
            .with_end(job.to_date),
    );

    tracing::info!(
        venue = %job.venue,
        tickers = ?job.tickers,
        resolution = %job.resolution,
        destination = %destination,
        "download job configured"
    );

    if job.once {
        match scheduler.fire() {
            FireOutcome::Completed(report) => print_report(&report),
            FireOutcome::Idle => println!("Nothing to download: window is empty."),
            FireOutcome::Panicked => println!("Cycle aborted unexpectedly; see log."),
            FireOutcome::Dropped => {}
        }
        return Ok(());
    }

    // Runs until the process is terminated.
    let stop = Arc::new(AtomicBool::new(false));
    let stats = IntervalTrigger::new(job.interval)
        .wait_for_completion(job.wait_for_completion)
        .run(scheduler, stop)
        .context("failed to spawn cycle thread")?;
    println!(
        "Trigger stopped: {} fired, {} completed, {} dropped",
        stats.fired, stats.completed, stats.dropped
    );
    Ok(())
}

fn run_update_symbols(venue: Venue, output: PathBuf) -> Result<()> {
    let breaker = Arc::new(CircuitBreaker::default_venue());
    let client = BinanceClient::new(venue, breaker).context("failed to build HTTP client")?;
    let summary = update_symbol_properties(&client, &output)
        .with_context(|| format!("failed to update {}", output.display()))?;
    println!(
        "{}: {} symbols written, {} removed, {} rows of other markets kept ({})",
        summary.market,
        summary.written,
        summary.removed,
        summary.kept_other_markets,
        output.display()
    );
    Ok(())
}

fn print_report(report: &CycleReport) {
    println!(
        "Window {} .. {}: {} written, {} without data, {} failed",
        report.window.from(),
        report.window.to(),
        report.succeeded(),
        report.skipped(),
        report.failed()
    );
    for t in &report.tickers {
        match &t.outcome {
            TickerOutcome::Written(written) => {
                let parts: Vec<String> = written
                    .iter()
                    .map(|(res, n)| format!("{res}={n}"))
                    .collect();
                println!("  {:<12} {}", t.ticker, parts.join(" "));
            }
            TickerOutcome::NoData => println!("  {:<12} no data", t.ticker),
            TickerOutcome::Failed(e) => println!("  {:<12} FAILED: {e}", t.ticker),
        }
    }
}
