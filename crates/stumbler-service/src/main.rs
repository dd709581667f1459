//! Stumbler Service - report ingestion, retention and drain.
//!
//! Run with: `cargo run -p stumbler-service -- run < reports.jsonl`

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use stumbler_service::{Config, StatusReport, Sweeper, drain, ingest};
use stumbler_store::{ReportStore, RetentionOutcome};

/// Stumbler Service - report ingestion, retention and drain.
#[derive(Parser, Debug)]
#[command(name = "stumbler-service")]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Store base directory (overrides config).
    #[arg(short, long, global = true)]
    base_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read JSON-line reports from stdin into the store (default behavior).
    Run,

    /// Show queued data and upload statistics.
    Status {
        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Move every queued batch into the outbox directory.
    Drain {
        /// Outbox directory (overrides config).
        #[arg(short, long)]
        outbox: Option<PathBuf>,
    },

    /// Run the retention sweep now.
    Purge {
        /// Delete every batch regardless of age.
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging; stdout is reserved for command output
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("stumbler_service=info".parse()?)
                .add_directive("stumbler_store=info".parse()?),
        )
        .init();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default().unwrap_or_default(),
    };

    // Override config with CLI args
    if let Some(base_dir) = args.base_dir {
        config.storage.base_dir = base_dir;
    }
    config.validate()?;

    let store = ReportStore::open(config.storage.clone())?;

    match args.command {
        Some(Command::Run) | None => run(store, &config).await,
        Some(Command::Status { json }) => status(&store, json),
        Some(Command::Drain { outbox }) => {
            let outbox = outbox.unwrap_or_else(|| config.upload.outbox.clone());
            let summary = drain(&store, &outbox)?;
            println!(
                "Drained {} batch(es): {} report(s), {} wifi(s), {} cell(s), {} bytes",
                summary.batches, summary.reports, summary.wifis, summary.cells, summary.bytes
            );
            Ok(())
        }
        Some(Command::Purge { force }) => purge(&store, force),
    }
}

async fn run(store: ReportStore, config: &Config) -> anyhow::Result<()> {
    store.set_tracker(|is_empty: bool| {
        if is_empty {
            info!("Report store is empty");
        } else {
            debug!("Report store has queued data");
        }
    });

    let cancel = CancellationToken::new();
    let sweeper = Sweeper::new(
        store.clone(),
        config.retention.sweep_interval(),
        cancel.child_token(),
    )
    .start();

    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, shutting down");
            interrupt.cancel();
        }
    });

    info!("Reading reports from stdin");
    let summary = ingest(&store, BufReader::new(tokio::io::stdin()), cancel.clone()).await?;
    let interrupted = cancel.is_cancelled();
    cancel.cancel();
    sweeper.await?;

    tokio::task::spawn_blocking(move || store.shutdown()).await??;
    info!(
        "Stopped after {} report(s) ({} rejected)",
        summary.accepted, summary.rejected
    );

    if interrupted {
        // The blocking stdin read cannot be cancelled and would hold the runtime open
        std::process::exit(0);
    }
    Ok(())
}

fn status(store: &ReportStore, json: bool) -> anyhow::Result<()> {
    let report = StatusReport::collect(store)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report);
    }
    Ok(())
}

fn purge(store: &ReportStore, force: bool) -> anyhow::Result<()> {
    if force {
        let removed = store.delete_all()?;
        println!("Deleted {} batch file(s)", removed);
        return Ok(());
    }

    match store.sweep_expired()? {
        RetentionOutcome::Empty => println!("Nothing stored"),
        RetentionOutcome::Retained { .. } => println!(
            "Oldest batch is within {} week(s); nothing purged",
            store.max_weeks_stored()
        ),
        RetentionOutcome::Purged { files, .. } => {
            println!("Purged {} expired batch file(s)", files)
        }
    }
    Ok(())
}
