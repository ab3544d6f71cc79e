use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use ladder_builder::config::{AppConfig, Sport};
use ladder_builder::io::{Bz2Decompressor, LocalDirBlobStore, PostgresDocumentStore};
use ladder_builder::pipeline::Orchestrator;
use ladder_builder::Result;

#[derive(Parser)]
#[command(name = "ladder-builder", about = "Builds ladder/metadata documents from Betfair-style market files")]
struct Cli {
    /// Path to a TOML config file, or a directory containing one.
    #[arg(long, default_value = "config")]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Enumerate, build, and persist every matching market file under the configured folder.
    Run {
        #[arg(long)]
        folder: Option<String>,
        #[arg(long)]
        sport: Option<Sport>,
        #[arg(long)]
        uri: Option<String>,
        #[arg(long)]
        multiprocess: bool,
        #[arg(long)]
        worker_concurrency: Option<usize>,
        #[arg(long)]
        batch_size: Option<usize>,
    },
    /// Load and validate configuration without running the pipeline.
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Some(Command::Check) => {
            init_logging_simple();
            let config = AppConfig::load_from(&cli.config)?;
            info!(folder = %config.source.folder, sport = ?config.sport, "configuration is valid");
        }
        Some(Command::Run { folder, sport, uri, multiprocess, worker_concurrency, batch_size }) => {
            init_logging();
            let mut config = AppConfig::load_from(&cli.config)?;
            if let Some(folder) = folder {
                config.source.folder = folder.clone();
            }
            if let Some(sport) = sport {
                config.sport = *sport;
            }
            if let Some(uri) = uri {
                config.document_store.uri = uri.clone();
            }
            if *multiprocess {
                config.pipeline.is_multiprocess = true;
            }
            if let Some(n) = worker_concurrency {
                config.pipeline.worker_concurrency = *n;
            }
            if let Some(n) = batch_size {
                config.pipeline.batch_size = *n;
            }
            config.validate().map_err(|e| anyhow::anyhow!(e))?;

            run_pipeline(config).await?;
        }
        None => {
            init_logging_simple();
            warn!("no subcommand given, nothing to do. Try `run` or `check`.");
        }
    }

    Ok(())
}

async fn run_pipeline(config: AppConfig) -> Result<()> {
    let blob_store = Arc::new(LocalDirBlobStore::new(&config.source.folder));
    let decompressor = Arc::new(Bz2Decompressor);
    let document_store = Arc::new(
        PostgresDocumentStore::connect(
            &config.document_store.uri,
            config.document_store.max_connections,
            config.sport.namespace(),
        )
        .await?,
    );

    let orchestrator = Orchestrator::new(blob_store, decompressor, document_store, &config);
    let summary = orchestrator.run().await?;

    info!(
        files_seen = summary.files_seen,
        files_processed = summary.files_processed,
        files_skipped_filter = summary.files_skipped_filter,
        files_failed = summary.files_failed,
        "run complete"
    );

    if summary.files_failed > 0 {
        error!(files_failed = summary.files_failed, "some files failed to process");
    }

    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,ladder_builder=debug,sqlx=warn"));

    let log_dir = std::env::var("LADDER_LOG_DIR")
        .or_else(|_| std::env::var("LOG_DIR"))
        .unwrap_or_else(|_| "/var/log/ladder-builder".to_string());

    // `tracing_appender::rolling::daily` panics if it can't create the initial
    // log file, so writability is checked up front rather than handled there.
    let file_layer = if std::fs::create_dir_all(&log_dir).is_ok() {
        let test_path = std::path::Path::new(&log_dir).join(".ladder_builder_write_test");
        match std::fs::OpenOptions::new().create(true).append(true).open(&test_path) {
            Ok(_) => {
                let _ = std::fs::remove_file(&test_path);

                let file_appender = tracing_appender::rolling::daily(&log_dir, "ladder-builder.log");
                let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
                Box::leak(Box::new(guard));

                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_target(true),
                )
            }
            Err(e) => {
                eprintln!("Warning: could not write to log directory {log_dir} ({e}), file logging disabled");
                None
            }
        }
    } else {
        eprintln!("Warning: could not create log directory {log_dir}, file logging disabled");
        None
    };

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    let file_logging_enabled = file_layer.is_some();
    tracing_subscriber::registry().with(filter).with(console_layer).with(file_layer).init();

    if file_logging_enabled {
        eprintln!("Logging to: {log_dir}/ladder-builder.log");
    }
}

fn init_logging_simple() {
    let _ = tracing_subscriber::fmt().with_max_level(tracing::Level::WARN).try_init();
}
