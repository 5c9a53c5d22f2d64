//! routeimport - student bus-route import and validation.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use routeimport::db::summary_repo::{self, SummaryFilter};
use routeimport::ingest::{BroadcastProgress, ProgressReporter};
use routeimport::{
    load_config, seed_from_path, BatchManager, ChainRunner, Config, Database, FileSystemBlobStore,
    ImportProgressBroadcaster, ImportProgressEvent, MasterKind, UploadFile, UploadPolicy, Uploader,
    ValidationSuite, WorkerPool,
};

const CONFIG_FILE: &str = "config.json";

#[derive(Parser)]
#[command(name = "routeimport")]
#[command(about = "Student bus-route spreadsheet import and validation")]
#[command(version)]
struct Cli {
    /// Config file (defaults to ~/.routeimport/config.json when present)
    #[arg(short, long, global = true, env = "ROUTEIMPORT_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage upload batches
    Batch {
        #[command(subcommand)]
        command: BatchCommands,
    },

    /// Attach spreadsheets to a batch and wait for the import to finish
    Upload {
        batch_id: String,
        #[arg(required = true)]
        files: Vec<PathBuf>,
        #[arg(long)]
        uploaded_by: Option<String>,
    },

    /// Re-run the validators on a completed batch
    Validate { batch_id: String },

    /// Print validation summaries or raw rows as JSON
    Summaries {
        batch_id: String,
        #[arg(short, long, value_enum, default_value_t = SummaryKindArg::RouteRuns)]
        kind: SummaryKindArg,
        #[arg(short, long)]
        search: Option<String>,
        #[arg(short, long, default_value = "100")]
        limit: u64,
        #[arg(short, long, default_value = "0")]
        offset: u64,
    },

    /// Load master reference data from a CSV or XLSX file
    Master {
        #[arg(value_enum)]
        kind: MasterKindArg,
        path: PathBuf,
    },
}

#[derive(Subcommand)]
enum BatchCommands {
    Create {
        name: String,
        #[arg(long)]
        created_by: Option<String>,
    },
    List,
    Show {
        id: String,
    },
    Delete {
        id: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SummaryKindArg {
    RouteRuns,
    Schools,
    Students,
    Rows,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum MasterKindArg {
    Schools,
    SchoolMaps,
    Routes,
    Students,
}

impl From<MasterKindArg> for MasterKind {
    fn from(kind: MasterKindArg) -> Self {
        match kind {
            MasterKindArg::Schools => MasterKind::Schools,
            MasterKindArg::SchoolMaps => MasterKind::SchoolMaps,
            MasterKindArg::Routes => MasterKind::Routes,
            MasterKindArg::Students => MasterKind::Students,
        }
    }
}

/// Logs every event it receives.
struct LogProgress;

impl ProgressReporter for LogProgress {
    fn report(&self, event: ImportProgressEvent) {
        log_event(&event);
    }
}

fn log_event(event: &ImportProgressEvent) {
    match &event.error {
        Some(error) => warn!(phase = %event.phase, "{}: {}", event.message, error),
        None => info!(
            phase = %event.phase,
            processed = event.processed_records,
            total = event.total_records,
            "{}",
            event.message
        ),
    }
}

fn init_logging(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("routeimport=info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn resolve_config(path: Option<&Path>) -> anyhow::Result<Config> {
    if let Some(path) = path {
        return load_config(path).with_context(|| format!("loading {}", path.display()));
    }
    let default_path = routeimport::config::default_home().join(CONFIG_FILE);
    if default_path.exists() {
        return load_config(&default_path)
            .with_context(|| format!("loading {}", default_path.display()));
    }
    Ok(Config::default())
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    let config = resolve_config(cli.config.as_deref())?;
    let db = Database::open(&config.database_path())
        .with_context(|| format!("opening database {}", config.database_path))?;

    match cli.command {
        Commands::Batch { command } => run_batch(&db, command),
        Commands::Upload {
            batch_id,
            files,
            uploaded_by,
        } => run_upload(&config, db, &batch_id, &files, uploaded_by.as_deref()).await,
        Commands::Validate { batch_id } => {
            let report = ValidationSuite::new().validate_batch(&db, &batch_id, &LogProgress)?;
            print_json(&report)
        }
        Commands::Summaries {
            batch_id,
            kind,
            search,
            limit,
            offset,
        } => {
            let filter = SummaryFilter {
                batch_id: Some(batch_id),
                search,
                limit: Some(limit),
                offset: Some(offset),
            };
            let page = match kind {
                SummaryKindArg::RouteRuns => {
                    let (items, total) = summary_repo::list_route_runs(&db, &filter)?;
                    json!({ "total": total, "items": items })
                }
                SummaryKindArg::Schools => {
                    let (items, total) = summary_repo::list_schools(&db, &filter)?;
                    json!({ "total": total, "items": items })
                }
                SummaryKindArg::Students => {
                    let (items, total) = summary_repo::list_students(&db, &filter)?;
                    json!({ "total": total, "items": items })
                }
                SummaryKindArg::Rows => {
                    let (items, total) = summary_repo::list_rows(&db, &filter)?;
                    json!({ "total": total, "items": items })
                }
            };
            print_json(&page)
        }
        Commands::Master { kind, path } => {
            let written = seed_from_path(&db, kind.into(), &path)?;
            println!("Loaded {} record(s) from {}", written, path.display());
            Ok(())
        }
    }
}

fn run_batch(db: &Database, command: BatchCommands) -> anyhow::Result<()> {
    let manager = BatchManager::new(db.clone());
    match command {
        BatchCommands::Create { name, created_by } => {
            print_json(&manager.create_batch(&name, created_by.as_deref())?)
        }
        BatchCommands::List => print_json(&manager.list_batches()?),
        BatchCommands::Show { id } => print_json(&manager.batch_detail(&id)?),
        BatchCommands::Delete { id } => {
            manager.delete_batch(&id)?;
            println!("Deleted batch {}", id);
            Ok(())
        }
    }
}

async fn run_upload(
    config: &Config,
    db: Database,
    batch_id: &str,
    paths: &[PathBuf],
    uploaded_by: Option<&str>,
) -> anyhow::Result<()> {
    let files = paths
        .iter()
        .map(UploadFile::from_path)
        .collect::<Result<Vec<_>, _>>()?;

    let broadcaster = ImportProgressBroadcaster::default();
    let mut events = broadcaster.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => warn!("Skipped {} progress events", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let blobs = Arc::new(FileSystemBlobStore::new(config.storage_directory()));
    let runner = ChainRunner::new(db.clone(), blobs.clone())
        .with_flush_interval(config.progress_flush_interval);
    let pool = Arc::new(WorkerPool::new(
        Arc::new(runner),
        Arc::new(BroadcastProgress::new(broadcaster)),
        config.worker_count,
    ));

    let uploader = Uploader::new(
        db,
        blobs,
        pool.clone(),
        UploadPolicy::from_config(config),
    );
    let rows = uploader.upload(batch_id, &files, uploaded_by)?;
    drop(uploader);
    info!("Uploaded {} file(s) to batch {}", rows.len(), batch_id);

    let result = tokio::task::spawn_blocking(move || {
        let result = pool.recv_result();
        if let Ok(pool) = Arc::try_unwrap(pool) {
            pool.wait();
        }
        result
    })
    .await?;
    // Every sender is gone once the pool stopped.
    printer.await?;

    let result = match result {
        Some(result) => result?,
        None => bail!("worker pool stopped before batch {} finished", batch_id),
    };
    for outcome in &result.outcomes {
        println!(
            "{}: {} ({} of {} rows){}",
            outcome.file_id,
            outcome.status,
            outcome.processed_records,
            outcome.total_records,
            outcome
                .error
                .as_deref()
                .map(|e| format!(" - {}", e))
                .unwrap_or_default()
        );
    }
    match &result.validation {
        Some(Ok(report)) => print_json(report),
        Some(Err(e)) => bail!("validation of batch {} failed: {}", batch_id, e),
        None => bail!("batch {} finished as {}", batch_id, result.batch_status),
    }
}
