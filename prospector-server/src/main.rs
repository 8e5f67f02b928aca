//! # Prospector
//!
//! Autonomous research orchestrator. `prospector serve` runs the scheduling
//! loop against Postgres and a remote research executor; the other
//! subcommands inspect or steer a running deployment through the same
//! database.

use std::path::PathBuf;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use prospector_config::{ConfigLoad, ConfigLoader, ConfigSource};
use prospector_core::{MIGRATOR, orchestration::EnqueueRequest};
use prospector_model::{JobId, ResearchMode};
use prospector_server::{AppContext, connect_database};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "prospector")]
#[command(about = "Autonomous research orchestrator for strategy discovery")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    global: GlobalArgs,
}

#[derive(ClapArgs, Debug, Clone)]
struct GlobalArgs {
    /// Configuration file (TOML, or JSON by extension)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Alternate .env file
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the scheduler until interrupted (default)
    Serve,
    #[command(subcommand)]
    Db(DbCommand),
    /// Print a JSON snapshot of state, budgets and mode gates
    Status,
    /// Queue a research job
    Enqueue(EnqueueArgs),
    /// Cancel a queued or running job
    Cancel {
        job_id: JobId,
    },
    /// Toggle the full-spectrum meta mode
    FullSpectrum {
        #[arg(value_enum)]
        switch: Switch,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    /// Apply database migrations and exit
    Migrate,
}

#[derive(ClapArgs, Debug)]
struct EnqueueArgs {
    /// CONTRARIAN_SCAN, SENTIMENT_BURST, DEEP_REASONING or FULL_SPECTRUM
    mode: ResearchMode,

    /// Overrides the mode's configured priority
    #[arg(long)]
    priority: Option<i32>,

    /// Earliest launch time (RFC 3339)
    #[arg(long)]
    at: Option<DateTime<Utc>>,

    /// Overrides the mode's configured retry budget
    #[arg(long)]
    max_retries: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Switch {
    On,
    Off,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let ConfigLoad { config, warnings } = load_config(&cli.global)?;

    init_tracing();
    if config.metadata.env_file_loaded {
        info!("loaded .env file");
    }
    match &config.metadata.source {
        ConfigSource::Defaults => {}
        ConfigSource::EnvInline => {
            info!("configuration loaded from inline environment json")
        }
        ConfigSource::Explicit(path)
        | ConfigSource::EnvPath(path)
        | ConfigSource::File(path) => {
            info!(path = %path.display(), "configuration loaded from file")
        }
    }
    for warning in warnings.iter() {
        match &warning.hint {
            Some(hint) => {
                warn!(message = %warning.message, hint = %hint, "configuration warning")
            }
            None => warn!(message = %warning.message, "configuration warning"),
        }
    }

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Db(DbCommand::Migrate) => {
            let pool = connect_database(&config).await?;
            MIGRATOR
                .run(&pool)
                .await
                .context("database migration failed")?;
            info!("database migrations applied successfully");
            Ok(())
        }
        Command::Status => {
            let app = AppContext::initialize(config).await?;
            let snapshot = app.orchestrator.snapshot().await?;
            print_json(&snapshot)
        }
        Command::Enqueue(args) => {
            let app = AppContext::initialize(config).await?;
            let mut request = EnqueueRequest::new(args.mode);
            if let Some(priority) = args.priority {
                request = request.with_priority(priority);
            }
            if let Some(at) = args.at {
                request = request.scheduled_for(at);
            }
            if let Some(max_retries) = args.max_retries {
                request = request.with_max_retries(max_retries);
            }
            let job = app.orchestrator.enqueue(request).await?;
            print_json(&job)
        }
        Command::Cancel { job_id } => {
            let app = AppContext::initialize(config).await?;
            let job = app
                .orchestrator
                .cancel(job_id)
                .await
                .with_context(|| format!("failed to cancel job {job_id}"))?;
            print_json(&job)
        }
        Command::FullSpectrum { switch } => {
            let app = AppContext::initialize(config).await?;
            let state = app
                .orchestrator
                .set_full_spectrum(switch == Switch::On)
                .await?;
            print_json(&state)
        }
    }
}

fn load_config(args: &GlobalArgs) -> anyhow::Result<ConfigLoad> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = &args.config {
        loader = loader.with_config_path(path);
    }
    if let Some(path) = &args.env_file {
        loader = loader.with_env_file(path);
    }
    loader.load().context("failed to load configuration")
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                // Scheduler decisions at info; override via RUST_LOG.
                "info,research::scheduler=info,research::runtime=info,sqlx=warn".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let rendered = serde_json::to_string_pretty(value)
        .context("failed to render output")?;
    println!("{rendered}");
    Ok(())
}

async fn serve(config: prospector_config::Config) -> anyhow::Result<()> {
    let app = AppContext::initialize(config).await?;
    let runtime = app.runtime()?;
    let logger = app.spawn_event_logger(runtime.shutdown_token());

    info!(
        instance_id = %app.config.orchestrator.instance_id,
        max_concurrent = app.config.orchestrator.max_concurrent,
        full_spectrum = app.config.orchestrator.full_spectrum_enabled,
        tick_interval_ms = app.config.orchestrator.runtime.tick_interval_ms,
        "orchestrator configuration in effect"
    );
    runtime.start().await?;

    shutdown_signal().await;
    runtime.shutdown().await?;
    if let Err(error) = logger.await {
        warn!(error = ?error, "event logger task failed");
    }
    app.pool.close().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!(error = %error, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(
            tokio::signal::unix::SignalKind::terminate(),
        ) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                warn!(error = %error, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
