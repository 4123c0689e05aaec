//! Portfolio Rebalancer - Main Entry Point
//!
//! Runs the rebalance engine against the bundled paper trading host.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use portfolio_rebalancer::allocation::{AllocationSource, AllocationTable, ConfigAllocationSource};
use portfolio_rebalancer::config::Config;
use portfolio_rebalancer::engine::{EngineState, RebalanceEngine, TracingStatusSink};
use portfolio_rebalancer::exchange::{PaperTradingHost, TradingHost};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Portfolio Rebalancer CLI
#[derive(Parser)]
#[command(name = "portfolio-rebalancer")]
#[command(version, about = "Margin-budgeted portfolio rebalancing engine")]
struct Cli {
    /// Configuration file (default: optional ./config.{toml,yaml,json})
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine against the paper trading host (default)
    Run,

    /// Validate configuration and allocation table, then exit
    Check {
        /// Print the validated table as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    let config = Config::load_from(cli.config.as_deref())?;

    match cli.command {
        Some(Commands::Check { json }) => check(config, json).await,
        Some(Commands::Run) | None => run(config).await,
    }
}

/// Load settings and table through the allocation source.
fn load_startup(config: Config) -> Result<(Config, AllocationTable)> {
    let source = ConfigAllocationSource::new(config.clone());
    source.read_config()?;
    let table = source.read_allocation_table()?;
    Ok((config, table))
}

async fn check(config: Config, json: bool) -> Result<()> {
    let (config, table) = load_startup(config)?;
    let host = PaperTradingHost::from_config(&config.paper);

    let mut problems = Vec::new();
    for entry in table.entries() {
        match host.instrument(&entry.instrument_key).await {
            None => problems.push(format!("{}: not found on host", entry.display_name())),
            Some(info) if !info.tradable => {
                problems.push(format!("{}: not tradable", entry.display_name()))
            }
            Some(info) => {
                if let Err(e) = entry.check_instrument(config.engine.default_max_exposure, &info) {
                    problems.push(e.to_string());
                }
            }
        }
    }

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&table).context("Failed to serialize allocation table")?
        );
    } else {
        println!("{table}");
    }

    if !problems.is_empty() {
        for problem in &problems {
            error!("{}", problem);
        }
        bail!("{} allocation entries failed host checks", problems.len());
    }

    info!("Configuration and allocation table are valid");
    Ok(())
}

async fn run(config: Config) -> Result<()> {
    info!(
        "Portfolio Rebalancer v{} - paper trading",
        env!("CARGO_PKG_VERSION")
    );

    let (config, table) = load_startup(config)?;
    log_config(&config, &table);

    let host = Arc::new(PaperTradingHost::from_config(&config.paper));
    let mut engine = RebalanceEngine::new(
        host,
        table,
        config.engine.clone(),
        config.execution.clone(),
        Box::new(TracingStatusSink::default()),
    )
    .await?;

    // Shutdown signal
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutdown signal received");
        shutdown_clone.store(true, Ordering::SeqCst);
    });

    if let EngineState::Halted(_) = engine.run(Arc::clone(&shutdown)).await {
        warn!("Engine halted; no further cycles will run. Press ctrl-c to exit");
        while !shutdown.load(Ordering::SeqCst) {
            tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        }
    }

    info!(cycles = engine.cycles_run(), "Portfolio Rebalancer shutdown complete");
    Ok(())
}

/// Initialize logging with stdout and rolling file output.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "portfolio-rebalancer.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Keep the writer alive for the program duration
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("portfolio_rebalancer=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}

/// Log configuration on startup.
fn log_config(config: &Config, table: &AllocationTable) {
    info!("Configuration:");
    info!("   Capital Basis: {}", config.engine.capital_basis);
    info!(
        "   Rebalance Interval: {} min",
        config.engine.rebalance_interval_minutes
    );
    info!(
        "   Equity Snapshot Interval: {} s",
        config.engine.equity_snapshot_interval_secs
    );
    info!(
        "   Equity Drawdown Stop: {}%",
        config.engine.equity_drawdown_stop_percent.normalize()
    );
    if let Some(cap) = config.engine.default_max_exposure {
        info!("   Default Max Exposure: {} lots", cap);
    }
    info!(
        "   Retries: {} attempts, {} ms apart",
        config.execution.max_attempts, config.execution.retry_delay_ms
    );
    info!("   Order Tag: {}", config.execution.order_tag);
    info!("   Paper Balance: {}", config.paper.initial_balance);
    info!("Allocation:");
    for line in table.to_string().lines() {
        info!("   {}", line);
    }
}
