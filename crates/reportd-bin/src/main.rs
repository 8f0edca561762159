//! reportd binary entry point.
//!
//! `reportd run` starts the delivery daemon: confirmation listener plus the
//! resend/purge schedules, until Ctrl-C. `reportd produce` is a one-shot
//! that reads a completed-contract batch from a JSON file, produces one
//! report record and publishes it.

use anyhow::Context;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use reportd_database::AsyncDatabase;
use reportd_pipeline::{
    CompletedContract, ConfirmationProcessor, ContractSource, PipelineError, PipelineResult,
    ReportProducer, ResendScheduler, SchedulerConfig,
};
use reportd_transport::{
    ConfirmationConsumer, ConfirmationListener, RedisReportSender, TransportConfig,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// reportd command-line interface.
#[derive(Parser)]
#[command(name = "reportd")]
#[command(about = "Bookkeeping report delivery daemon")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Path to the SQLite database file
    #[arg(long, env = "REPORTD_DB_PATH", default_value = "reportd.db", global = true)]
    db_path: PathBuf,

    /// Redis connection URL
    #[arg(
        long,
        env = "REDIS_URL",
        default_value = "redis://127.0.0.1:6379",
        global = true
    )]
    redis_url: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the delivery daemon (confirmation listener + resend/purge schedules)
    Run {
        /// Disable the resend schedule
        #[arg(long, env = "REPORTD_NO_RESEND")]
        no_resend: bool,

        /// Seconds between resend cycles
        #[arg(long, env = "REPORTD_RESEND_INTERVAL_SECS", default_value = "60")]
        resend_interval_secs: u64,

        /// Disable the purge schedule
        #[arg(long, env = "REPORTD_NO_PURGE")]
        no_purge: bool,

        /// Seconds between purge cycles
        #[arg(long, env = "REPORTD_PURGE_INTERVAL_SECS", default_value = "3600")]
        purge_interval_secs: u64,

        /// Seconds a confirmed record is retained before purge (0 purges all)
        #[arg(long, env = "REPORTD_PURGE_RETENTION_SECS", default_value = "86400")]
        purge_retention_secs: u64,
    },
    /// Produce one report from a JSON file of completed contracts and publish it
    Produce {
        /// Path to a JSON array of completed contracts
        #[arg(long)]
        contracts: PathBuf,
    },
}

/// Contract source backed by a JSON file.
///
/// The contract-completion query is a collaborator of this pipeline, not a
/// part of it; the CLI feeds the producer from a file instead of a live
/// marketplace service.
struct FileContractSource {
    path: PathBuf,
}

#[async_trait]
impl ContractSource for FileContractSource {
    async fn completed_unreported(&self) -> PipelineResult<Vec<CompletedContract>> {
        let data = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            PipelineError::ContractSource(format!("read {}: {e}", self.path.display()))
        })?;
        Ok(serde_json::from_str(&data)?)
    }
}

fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level);

    let mut transport_config = TransportConfig::new();
    transport_config.redis_url = cli.redis_url.clone();

    match cli.command {
        Commands::Run {
            no_resend,
            resend_interval_secs,
            no_purge,
            purge_interval_secs,
            purge_retention_secs,
        } => {
            let scheduler_config = SchedulerConfig {
                resend_enabled: !no_resend,
                resend_interval: Duration::from_secs(resend_interval_secs),
                purge_enabled: !no_purge,
                purge_interval: Duration::from_secs(purge_interval_secs),
                purge_retention: Duration::from_secs(purge_retention_secs),
            };
            run_daemon(&cli.db_path, transport_config, scheduler_config).await
        }
        Commands::Produce { contracts } => {
            produce_once(&cli.db_path, transport_config, contracts).await
        }
    }
}

async fn run_daemon(
    db_path: &std::path::Path,
    transport_config: TransportConfig,
    scheduler_config: SchedulerConfig,
) -> anyhow::Result<()> {
    info!("reportd starting...");
    info!(
        db_path = %db_path.display(),
        redis_url = %transport_config.redis_url,
        report_stream = %transport_config.report_stream,
        confirmation_stream = %transport_config.confirmation_stream,
        message_ttl_secs = transport_config.message_ttl.as_secs(),
        consumer = %transport_config.consumer_name,
        "Configuration loaded"
    );

    let db = AsyncDatabase::open(db_path)
        .await
        .context("Failed to open database")?;

    let sender = Arc::new(
        RedisReportSender::connect(transport_config.clone())
            .await
            .context("Failed to connect report sender")?,
    );
    let consumer = ConfirmationConsumer::connect(transport_config)
        .await
        .context("Failed to connect confirmation consumer")?;

    let handler = Arc::new(ConfirmationProcessor::new(db.clone()));
    let mut listener = ConfirmationListener::new(consumer, handler);

    let scheduler = Arc::new(ResendScheduler::new(
        db.clone(),
        sender,
        scheduler_config,
    ));
    let schedule_handles = scheduler.start();

    tokio::select! {
        result = listener.run() => {
            if let Err(e) = result {
                error!(error = %e, "Confirmation listener exited with error");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal, exiting...");
        }
    }

    for handle in schedule_handles {
        handle.abort();
    }
    db.close().await.context("Failed to close database")?;

    Ok(())
}

async fn produce_once(
    db_path: &std::path::Path,
    transport_config: TransportConfig,
    contracts: PathBuf,
) -> anyhow::Result<()> {
    let db = AsyncDatabase::open(db_path)
        .await
        .context("Failed to open database")?;
    let sender = Arc::new(
        RedisReportSender::connect(transport_config)
            .await
            .context("Failed to connect report sender")?,
    );

    let producer = ReportProducer::new(db.clone(), sender);
    let source = FileContractSource { path: contracts };

    match producer.produce_report(&source).await? {
        Some(record) => {
            println!("report {} {}", record.id, record.ack_status.as_str());
        }
        None => {
            println!("no completed contracts to report");
        }
    }

    db.close().await.context("Failed to close database")?;
    Ok(())
}
