// ABOUTME: Entry point for the flock binary.
// ABOUTME: Parses CLI arguments, initializes tracing, and serves the API or runs a one-shot backup command.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use flock_core::{ExportFormat, Principal, RestoreMode};
use flock_server::{AppState, AuthLayer, FlockConfig, create_router};
use flock_store::{BackupService, StorageManager, archive};

/// Congregation data snapshots: backup, restore, and export.
#[derive(Parser, Debug)]
#[command(name = "flock")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Data directory (defaults to FLOCK_HOME, then ~/.flock)
    #[arg(long, env = "FLOCK_HOME", global = true)]
    home: Option<PathBuf>,

    /// Principal name that local commands act as
    #[arg(long = "as", value_name = "NAME", default_value = "local", global = true)]
    principal: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve the HTTP API
    Serve,

    /// Take a full snapshot, archiving it unless --out is given
    Backup {
        /// Write the snapshot to this file instead of the archive
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Replace all data with a snapshot file
    Restore {
        /// Snapshot JSON file
        file: PathBuf,

        #[arg(short, long, value_enum)]
        mode: Option<ModeArg>,
    },

    /// Render the current data as a download file
    Export {
        #[arg(short = 'F', long, value_enum, default_value = "json")]
        format: FormatArg,

        /// Entity type for CSV exports
        #[arg(short = 't', long = "type")]
        entity_type: Option<String>,

        /// Output path (defaults to the exports directory)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// List every registered entity with its record count
    Entities,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum ModeArg {
    Staged,
    InPlace,
}

impl From<ModeArg> for RestoreMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Staged => RestoreMode::Staged,
            ModeArg::InPlace => RestoreMode::InPlace,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum FormatArg {
    Json,
    Csv,
}

impl From<FormatArg> for ExportFormat {
    fn from(format: FormatArg) -> Self {
        match format {
            FormatArg::Json => ExportFormat::Json,
            FormatArg::Csv => ExportFormat::Csv,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .or_else(|_| tracing_subscriber::EnvFilter::try_new("flock=debug,tower_http=debug"))?,
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let principal = Principal::new(cli.principal);

    match cli.command {
        Commands::Serve => {
            let mut config = FlockConfig::from_env()?;
            if let Some(home) = cli.home {
                config.home = home;
            }
            serve(config).await?;
        }
        Commands::Backup { out } => {
            let (storage, service) = open_local(cli.home)?;
            let snapshot = service
                .create_backup(Some(&principal))
                .await
                .into_result()
                .map_err(anyhow::Error::msg)?;
            match out {
                Some(path) => {
                    std::fs::write(&path, serde_json::to_string_pretty(&snapshot)?)
                        .with_context(|| format!("writing {}", path.display()))?;
                    println!("{}", path.display());
                }
                None => {
                    let entry = archive::save_backup(&storage.backups_dir(), &snapshot)?;
                    println!("{} {}", entry.id, entry.path.display());
                }
            }
            tracing::info!(
                "backup complete: {} records",
                snapshot.metadata().total_records
            );
        }
        Commands::Restore { file, mode } => {
            let (_storage, service) = open_local(cli.home)?;
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let payload: serde_json::Value = serde_json::from_str(&text)
                .with_context(|| format!("parsing {}", file.display()))?;

            let outcome = service
                .restore_backup(Some(&principal), payload, mode.map(RestoreMode::from))
                .await;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            if !outcome.success {
                bail!(outcome.error.unwrap_or_else(|| "restore failed".to_string()));
            }
        }
        Commands::Export {
            format,
            entity_type,
            out,
        } => {
            let (storage, service) = open_local(cli.home)?;
            let file = service
                .export_backup_file(Some(&principal), format.into(), entity_type.as_deref())
                .await
                .into_result()
                .map_err(anyhow::Error::msg)?;
            let path = match out {
                Some(path) => {
                    std::fs::write(&path, &file.content)
                        .with_context(|| format!("writing {}", path.display()))?;
                    path
                }
                None => storage.write_export(&file)?,
            };
            println!("{}", path.display());
        }
        Commands::Entities => {
            let (_storage, service) = open_local(cli.home)?;
            let counts = service.entity_counts(Some(&principal)).await?;
            for entry in counts {
                println!("{:<24} {}", entry.name, entry.count);
            }
        }
    }

    Ok(())
}

/// Open the store under `home` (or the configured home) for a one-shot command.
fn open_local(home: Option<PathBuf>) -> anyhow::Result<(StorageManager, BackupService)> {
    let home = match home {
        Some(home) => home,
        None => FlockConfig::from_env()?.home,
    };
    let storage = StorageManager::new(home)?;
    let service = BackupService::new(Arc::new(storage.open_store()?));
    Ok((storage, service))
}

async fn serve(config: FlockConfig) -> anyhow::Result<()> {
    let storage = StorageManager::new(config.home.clone())?;
    let store = storage.open_store()?;
    tracing::info!("opened store at {}", storage.db_path().display());

    let service = BackupService::new(Arc::new(store)).with_default_mode(config.restore_mode);
    let auth = AuthLayer::from_config(config.auth_token.clone(), &config.operator);
    if config.auth_token.is_none() {
        tracing::warn!("FLOCK_AUTH_TOKEN not set; API requests act as the local principal");
    }

    let state =
        Arc::new(AppState::new(service, storage).with_max_restore_bytes(config.max_restore_bytes));
    let app = create_router(state, auth);

    tracing::info!("flock listening on http://{}", config.bind);

    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
