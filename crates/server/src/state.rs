use std::sync::Arc;

use nexusdrop_core::{Config, DownloadOrchestrator, SanitizedConfig, TorrentBackend};

/// Shared application state
pub struct AppState {
    config: Config,
    orchestrator: DownloadOrchestrator,
    torrent: Option<Arc<TorrentBackend>>,
}

impl AppState {
    pub fn new(
        config: Config,
        orchestrator: DownloadOrchestrator,
        torrent: Option<Arc<TorrentBackend>>,
    ) -> Self {
        Self {
            config,
            orchestrator,
            torrent,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn orchestrator(&self) -> &DownloadOrchestrator {
        &self.orchestrator
    }

    /// Peer transport, if enabled.
    pub fn torrent_backend(&self) -> Option<&Arc<TorrentBackend>> {
        self.torrent.as_ref()
    }
}
