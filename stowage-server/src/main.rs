mod config;

use clap::{Parser, Subcommand};
use config::Config;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use stowage_core::model::parse_backup_time;
use stowage_core::operations::{
    GarbageCollectOperation, GarbageCollectOperationRequest, LatestSnapshotOperation,
    LatestSnapshotOperationOutcome, LatestSnapshotOperationRequest, ListSnapshotsOperation,
    ListSnapshotsOperationRequest, ReadMetadataOperationRequest, SnapshotMetadataOperation,
    WriteMetadataOperationRequest,
};
use stowage_core::{
    GarbageCollector, GroupId, MetadataUpdate, RestoreReader, SnapshotCatalog, SnapshotId,
    StopSignal, StoreBuilder,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "stowage")]
#[command(about = "Deduplicated backup storage on S3-compatible object stores")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml", global = true)]
    config: String,

    /// Datastore to operate on; may be omitted when only one is configured
    #[arg(short, long, global = true)]
    datastore: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List snapshots
    Snapshots {
        /// Only snapshots of this group, e.g. vm/100
        #[arg(long)]
        group: Option<String>,

        /// Include snapshots whose manifest or index blobs are damaged
        #[arg(long)]
        include_corrupted: bool,
    },
    /// List snapshot groups
    Groups,
    /// Show the newest usable snapshot of a group
    Latest {
        group: String,

        /// Upper bound on the backup time (RFC3339), defaults to now
        #[arg(long)]
        not_after: Option<String>,
    },
    /// Show the protected flag and note of a snapshot
    Metadata { snapshot: String },
    /// Protect a snapshot, or lift the protection with --remove
    Protect {
        snapshot: String,

        #[arg(long)]
        remove: bool,
    },
    /// Set the note of a snapshot; an empty note clears it
    Note { snapshot: String, text: String },
    /// Write one archive of a snapshot to a file
    Restore {
        snapshot: String,
        archive: String,
        output: PathBuf,
    },
    /// Remove chunks no snapshot references
    Gc {
        /// Report what would be removed without deleting
        #[arg(long)]
        dry_run: bool,

        /// Stop issuing requests after this many seconds
        #[arg(long)]
        deadline_secs: Option<u64>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stowage=info,stowage_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let cfg = match Config::from_file(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(cli, cfg).await {
        tracing::error!("Command failed: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli, cfg: Config) -> stowage_core::Result<()> {
    let datastore = cfg.datastore(cli.datastore.as_deref())?.clone();
    let store = StoreBuilder::new().config(cfg.storage.clone()).build()?;
    let catalog = Arc::new(SnapshotCatalog::open(store, &datastore)?);

    tracing::debug!(
        "Opened datastore {} (tagging={}, retention_window_secs={})",
        datastore.name,
        catalog.metadata_enabled(),
        datastore.retention_window_secs
    );

    match cli.command {
        Commands::Snapshots {
            group,
            include_corrupted,
        } => {
            let group = group.map(|group| group.parse::<GroupId>()).transpose()?;
            let result = ListSnapshotsOperation::new(catalog)
                .run(ListSnapshotsOperationRequest {
                    group,
                    include_corrupted,
                })
                .await?;
            print_json(&result)
        }
        Commands::Groups => print_json(&catalog.list_groups().await?),
        Commands::Latest { group, not_after } => {
            let group: GroupId = group.parse()?;
            let not_after = not_after
                .as_deref()
                .map(parse_backup_time)
                .transpose()?;
            let outcome = LatestSnapshotOperation::new(catalog)
                .run(LatestSnapshotOperationRequest {
                    group: group.clone(),
                    not_after,
                })
                .await?;
            match outcome {
                LatestSnapshotOperationOutcome::Found(snapshot) => print_json(&snapshot),
                LatestSnapshotOperationOutcome::NotFound => {
                    tracing::warn!("No snapshot found for group {}", group);
                    print_json(&serde_json::Value::Null)
                }
            }
        }
        Commands::Metadata { snapshot } => {
            let metadata = SnapshotMetadataOperation::new(catalog)
                .run_read(ReadMetadataOperationRequest {
                    snapshot: snapshot.parse()?,
                })
                .await?;
            print_json(&metadata)
        }
        Commands::Protect { snapshot, remove } => {
            write_metadata(
                catalog,
                snapshot.parse()?,
                MetadataUpdate {
                    protected: Some(!remove),
                    note: None,
                },
            )
            .await
        }
        Commands::Note { snapshot, text } => {
            write_metadata(
                catalog,
                snapshot.parse()?,
                MetadataUpdate {
                    protected: None,
                    note: Some(text),
                },
            )
            .await
        }
        Commands::Restore {
            snapshot,
            archive,
            output,
        } => {
            let snapshot: SnapshotId = snapshot.parse()?;
            let body = RestoreReader::new(&catalog, datastore.concurrency)
                .read_archive(&snapshot, &archive)
                .await?;
            tokio::fs::write(&output, &body).await?;
            tracing::info!(
                "Restored {} of {} to {:?} ({} bytes)",
                archive,
                snapshot,
                output,
                body.len()
            );
            Ok(())
        }
        Commands::Gc {
            dry_run,
            deadline_secs,
        } => {
            let token = CancellationToken::new();
            let ctrl_c = token.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupt received; stopping garbage collection");
                    ctrl_c.cancel();
                }
            });

            let stop = match deadline_secs {
                Some(secs) => StopSignal::with_timeout(token, Duration::from_secs(secs)),
                None => StopSignal::new(token, None),
            };

            let collector = Arc::new(GarbageCollector::new(
                catalog,
                datastore.retention_window(),
                datastore.concurrency,
            ));
            let report = GarbageCollectOperation::new(collector)
                .run(GarbageCollectOperationRequest { dry_run, stop })
                .await?;
            if let Some(phase) = report.interrupted {
                tracing::warn!("Garbage collection interrupted during {:?}", phase);
            }
            print_json(&report)
        }
    }
}

async fn write_metadata(
    catalog: Arc<SnapshotCatalog>,
    snapshot: SnapshotId,
    update: MetadataUpdate,
) -> stowage_core::Result<()> {
    let outcome = SnapshotMetadataOperation::new(catalog)
        .run_write(WriteMetadataOperationRequest { snapshot, update })
        .await?;
    print_json(&outcome)
}

fn print_json<T: Serialize>(value: &T) -> stowage_core::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
