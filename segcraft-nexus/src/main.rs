//! segcraft-nexus - segment fabrication service
//!
//! Runs the chain supervisor and medic against the local SQLite database and
//! serves a read-only status API. The `load-library` and `start-chain`
//! subcommands bootstrap content and chains from the command line.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Duration;
use clap::{Parser, Subcommand};
use segcraft_common::config::{database_path, resolve_root_folder, ROOT_FOLDER_ENV};
use segcraft_common::db::init_database;
use segcraft_common::models::{Chain, ChainBinding, ChainBindingType, ChainState, ChainType};
use segcraft_common::time;
use segcraft_nexus::content::loader::load_library_file;
use segcraft_nexus::content::repository::{store_library, SqliteContentSource};
use segcraft_nexus::settings::NexusSettings;
use segcraft_nexus::store::{ChainStore, SqliteChainStore, SqliteSegmentStore};
use segcraft_nexus::supervisor::{HealthTracker, PassthroughDubber, Supervisor};
use segcraft_nexus::AppState;
use sqlx::SqlitePool;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// Command-line arguments for segcraft-nexus
#[derive(Parser, Debug)]
#[command(name = "segcraft-nexus")]
#[command(about = "Segment fabrication service")]
#[command(version)]
struct Args {
    /// Root folder holding the database
    #[arg(short, long)]
    root_folder: Option<String>,

    /// Port to listen on
    #[arg(short, long, default_value = "5790", env = "SEGCRAFT_PORT")]
    port: u16,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the supervisor and status API (default)
    Run,
    /// Insert a library described by a TOML file
    LoadLibrary {
        file: PathBuf,
    },
    /// Create a chain bound to libraries and programs and start fabricating it
    StartChain {
        #[arg(long)]
        name: String,
        /// Library to bind (repeatable)
        #[arg(long = "library")]
        libraries: Vec<Uuid>,
        /// Program to bind directly (repeatable)
        #[arg(long = "program")]
        programs: Vec<Uuid>,
        /// Stop fabricating this many seconds after the start
        #[arg(long)]
        stop_after_seconds: Option<i64>,
        /// Create a preview chain instead of a production chain
        #[arg(long)]
        preview: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "segcraft_nexus=debug,segcraft_common=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let root_folder = resolve_root_folder(args.root_folder.as_deref(), ROOT_FOLDER_ENV)
        .context("Failed to resolve root folder")?;
    std::fs::create_dir_all(&root_folder)
        .with_context(|| format!("Failed to create root folder {}", root_folder.display()))?;
    let db_path = database_path(&root_folder);
    info!("Database: {}", db_path.display());

    let pool = init_database(&db_path).await.context("Failed to initialize database")?;
    let settings = NexusSettings::from_database(&pool).await;

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run(pool, settings, args.port).await,
        Command::LoadLibrary { file } => load_library(&pool, &file).await,
        Command::StartChain {
            name,
            libraries,
            programs,
            stop_after_seconds,
            preview,
        } => {
            let chain_type = if preview { ChainType::Preview } else { ChainType::Production };
            start_chain(&pool, &settings, name, chain_type, &libraries, &programs, stop_after_seconds).await
        }
    }
}

async fn run(pool: SqlitePool, settings: NexusSettings, port: u16) -> Result<()> {
    info!("Starting segcraft-nexus on port {}", port);
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let chains = Arc::new(SqliteChainStore::new(pool.clone(), settings.db_max_lock_wait_ms));
    let segments = Arc::new(SqliteSegmentStore::new(pool.clone(), settings.db_max_lock_wait_ms));
    let health = HealthTracker::new();

    let supervisor = Supervisor::new(
        chains.clone(),
        segments.clone(),
        Arc::new(SqliteContentSource::new(pool.clone())),
        Arc::new(PassthroughDubber),
        settings.clone(),
        health.clone(),
    );

    let cancel = CancellationToken::new();
    let supervisor_task = supervisor.clone().spawn(cancel.clone());
    let medic_task = supervisor.spawn_medic(cancel.clone());

    let app = segcraft_nexus::build_router(AppState::new(pool, chains, segments, health, settings));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);
    info!("Health check: http://127.0.0.1:{}/health", port);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    cancel.cancel();
    for task in [supervisor_task, medic_task] {
        if let Err(e) = task.await {
            error!("Background task ended abnormally: {}", e);
        }
    }

    info!("Server shutdown complete");
    Ok(())
}

async fn load_library(pool: &SqlitePool, file: &Path) -> Result<()> {
    let (library, content) =
        load_library_file(file).with_context(|| format!("Failed to load library file {}", file.display()))?;
    store_library(pool, &library, &content)
        .await
        .context("Failed to store library")?;

    info!(
        library_id = %library.id,
        programs = content.programs.len(),
        sequences = content.sequences.len(),
        "Loaded library '{}'",
        library.name
    );
    println!("{}", library.id);
    Ok(())
}

async fn start_chain(
    pool: &SqlitePool,
    settings: &NexusSettings,
    name: String,
    chain_type: ChainType,
    libraries: &[Uuid],
    programs: &[Uuid],
    stop_after_seconds: Option<i64>,
) -> Result<()> {
    if libraries.is_empty() && programs.is_empty() {
        anyhow::bail!("A chain needs at least one --library or --program binding");
    }

    let start_at = time::now() + Duration::seconds(settings.chain_start_in_future_seconds);
    let stop_at = stop_after_seconds.map(|s| start_at + Duration::seconds(s));
    let chain = Chain::new(name, chain_type, start_at, stop_at);

    let bindings: Vec<ChainBinding> = libraries
        .iter()
        .map(|id| ChainBinding::new(chain.id, ChainBindingType::Library, *id))
        .chain(programs.iter().map(|id| ChainBinding::new(chain.id, ChainBindingType::Program, *id)))
        .collect();

    let store = SqliteChainStore::new(pool.clone(), settings.db_max_lock_wait_ms);
    store.create_chain(&chain, &bindings).await.context("Failed to create chain")?;
    store
        .update_chain_state(chain.id, ChainState::Fabricate)
        .await
        .context("Failed to start chain")?;

    info!(chain_id = %chain.id, bindings = bindings.len(), "Started chain '{}'", chain.name);
    println!("{}", chain.id);
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install terminate handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
