use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nexusdrop_core::{
    load_config, validate_config, DownloadBackend, DownloadOrchestrator, FilenameProbe,
    HttpBackend, JobRegistry, LibrqbitClient, LifecycleSweeper, MirrorResolver,
    OrchestratorDeps, StorageLayout, TorrentBackend,
};
use nexusdrop_server::api::create_router;
use nexusdrop_server::state::AppState;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Determine config path
    let config_path = std::env::var("NEXUSDROP_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Load configuration
    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    // Validate configuration
    validate_config(&config).context("Configuration validation failed")?;

    let config_json = serde_json::to_string(&config).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    info!(
        version = VERSION,
        config_hash = &config_hash[..16],
        "Configuration loaded successfully"
    );

    // Storage roots
    let storage = StorageLayout::new(&config.storage);
    storage
        .ensure_dirs()
        .context("Failed to create storage directories")?;
    info!(
        http_dir = ?storage.http_dir(),
        peer_dir = ?storage.peer_dir(),
        "Storage directories ready"
    );

    // Registry, restored from the last snapshot
    let registry = Arc::new(JobRegistry::load(&config.storage.snapshot_path));
    info!(jobs = registry.len(), "Job registry loaded");

    // Resolver
    let mirror = MirrorResolver::new(&config.mirror);
    let probe = FilenameProbe::new(&config.http).context("Failed to create filename probe")?;

    // HTTP transport
    let http: Arc<dyn DownloadBackend> = Arc::new(
        HttpBackend::new(&config.http, mirror.clone(), storage.clone())
            .context("Failed to create HTTP transport")?,
    );

    // Peer transport
    let torrent: Option<Arc<TorrentBackend>> = if config.torrent.enabled {
        info!(
            staging = ?storage.staging_root(),
            "Initializing embedded librqbit client"
        );
        match LibrqbitClient::new(&config.torrent, &storage.staging_root()).await {
            Ok(client) => Some(Arc::new(TorrentBackend::new(
                Arc::new(client),
                storage.clone(),
                &config.torrent,
            ))),
            Err(e) => {
                error!("Failed to initialize librqbit client: {}", e);
                None
            }
        }
    } else {
        info!("Peer transport disabled in config");
        None
    };
    let peer = torrent
        .clone()
        .map(|backend| backend as Arc<dyn DownloadBackend>);

    // Orchestrator
    let orchestrator = DownloadOrchestrator::new(
        config.orchestrator.clone(),
        OrchestratorDeps {
            registry,
            storage,
            mirror,
            probe: Some(probe),
            filename_prefix: config.storage.filename_prefix.clone(),
            http,
            peer,
        },
    );
    orchestrator.start();
    info!("Download orchestrator started");

    // Background sweeps
    let sweeper = LifecycleSweeper::new(orchestrator.clone(), config.sweeper.clone());
    sweeper.start().await;
    info!("Lifecycle sweeper started");

    // Create app state
    let state = Arc::new(AppState::new(config.clone(), orchestrator.clone(), torrent));

    // Create router
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutting down...");
    sweeper.stop().await;
    orchestrator.stop();
    info!("Orchestrator stopped");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
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
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
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
}
