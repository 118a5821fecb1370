//! librqbit embedded torrent client implementation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use librqbit::{
    AddTorrent as RqbitAddTorrent, AddTorrentOptions, AddTorrentResponse, ManagedTorrent, Session,
    SessionOptions, SessionPersistenceConfig,
};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{
    AddTorrentRequest, AddTorrentResult, TorrentClient, TorrentClientError, TorrentInfo,
    TorrentState,
};
use crate::config::TorrentConfig;

/// How long an add may wait for magnet metadata.
const ADD_TIMEOUT: Duration = Duration::from_secs(60);

/// Embedded librqbit torrent client.
pub struct LibrqbitClient {
    session: Arc<Session>,
    download_path: PathBuf,
    /// Cache of torrent names by hash (for when metadata isn't available yet)
    name_cache: RwLock<HashMap<String, String>>,
}

impl LibrqbitClient {
    /// Create a new librqbit client. Torrents without an explicit download
    /// path land in `download_path`.
    pub async fn new(
        config: &TorrentConfig,
        download_path: &Path,
    ) -> Result<Self, TorrentClientError> {
        let download_path = download_path.to_path_buf();

        std::fs::create_dir_all(&download_path).map_err(|e| {
            TorrentClientError::ConnectionFailed(format!(
                "Failed to create download directory: {}",
                e
            ))
        })?;

        let mut opts = SessionOptions::default();

        if !config.enable_dht {
            opts.disable_dht = true;
        }

        // Range, not RangeInclusive
        if let Some(port) = config.listen_port {
            opts.listen_port_range = Some(port..(port + 1));
        }

        if let Some(ref persistence_path) = config.persistence_path {
            let persistence_dir = PathBuf::from(persistence_path);
            std::fs::create_dir_all(&persistence_dir).map_err(|e| {
                TorrentClientError::ConnectionFailed(format!(
                    "Failed to create persistence directory: {}",
                    e
                ))
            })?;
            opts.persistence = Some(SessionPersistenceConfig::Json {
                folder: Some(persistence_dir),
            });
        }

        info!(
            download_path = %download_path.display(),
            dht_enabled = !opts.disable_dht,
            "Initializing librqbit session"
        );

        let session = Session::new_with_opts(download_path.clone(), opts)
            .await
            .map_err(|e| {
                TorrentClientError::ConnectionFailed(format!(
                    "Failed to initialize librqbit session: {}",
                    e
                ))
            })?;

        if let Some(port) = session.tcp_listen_port() {
            info!(port = port, "librqbit listening on TCP port");
        }

        Ok(Self {
            session,
            download_path,
            name_cache: RwLock::new(HashMap::new()),
        })
    }

    fn format_hash(hash: &librqbit_core::Id20) -> String {
        hash.as_string()
    }

    async fn torrent_to_info(&self, torrent: &Arc<ManagedTorrent>) -> TorrentInfo {
        let hash = Self::format_hash(&torrent.info_hash());
        let stats = torrent.stats();

        let name = match torrent.name() {
            Some(name) => name.to_string(),
            None => self
                .name_cache
                .read()
                .await
                .get(&hash)
                .cloned()
                .unwrap_or_else(|| format!("torrent-{}", &hash[..8])),
        };

        let state = Self::map_state(&stats.state, torrent.is_paused(), stats.finished);

        let progress = if stats.total_bytes > 0 {
            stats.progress_bytes as f64 / stats.total_bytes as f64
        } else {
            0.0
        };

        let (download_speed, upload_speed, peers) = stats
            .live
            .as_ref()
            .map(|live| {
                // librqbit's "mbps" field holds MiB/s (see its Display impl)
                let dl_speed = (live.download_speed.mbps * 1024.0 * 1024.0) as u64;
                let ul_speed = (live.upload_speed.mbps * 1024.0 * 1024.0) as u64;
                (dl_speed, ul_speed, live.snapshot.peer_stats.live as u32)
            })
            .unwrap_or((0, 0, 0));

        let ratio = if stats.progress_bytes > 0 {
            stats.uploaded_bytes as f64 / stats.progress_bytes as f64
        } else {
            0.0
        };

        let eta_secs = if state == TorrentState::Downloading && download_speed > 0 {
            let remaining = stats.total_bytes.saturating_sub(stats.progress_bytes);
            Some(remaining / download_speed)
        } else {
            None
        };

        TorrentInfo {
            hash,
            name,
            state,
            progress,
            size_bytes: stats.total_bytes,
            downloaded_bytes: stats.progress_bytes,
            uploaded_bytes: stats.uploaded_bytes,
            download_speed,
            upload_speed,
            peers,
            ratio,
            eta_secs,
            save_path: Some(self.download_path.display().to_string()),
            error: stats.error.clone(),
        }
    }

    fn map_state(
        state: &librqbit::TorrentStatsState,
        is_paused: bool,
        is_finished: bool,
    ) -> TorrentState {
        use librqbit::TorrentStatsState;

        if is_paused {
            return TorrentState::Paused;
        }

        match state {
            TorrentStatsState::Initializing => TorrentState::Checking,
            TorrentStatsState::Live => {
                if is_finished {
                    TorrentState::Seeding
                } else {
                    TorrentState::Downloading
                }
            }
            TorrentStatsState::Paused => TorrentState::Paused,
            TorrentStatsState::Error => TorrentState::Error,
        }
    }

    fn find_torrent(&self, hash: &str) -> Option<Arc<ManagedTorrent>> {
        let hash_lower = hash.to_lowercase();

        self.session.with_torrents(|iter| {
            for (_, torrent) in iter {
                if Self::format_hash(&torrent.info_hash()) == hash_lower {
                    return Some(torrent.clone());
                }
            }
            None
        })
    }
}

#[async_trait]
impl TorrentClient for LibrqbitClient {
    fn name(&self) -> &str {
        "librqbit"
    }

    async fn add_torrent(
        &self,
        request: AddTorrentRequest,
    ) -> Result<AddTorrentResult, TorrentClientError> {
        let output_folder = request.download_path().map(str::to_string);

        let add_torrent = match request {
            AddTorrentRequest::Magnet { uri, .. } => RqbitAddTorrent::from_url(uri),
            AddTorrentRequest::TorrentFile { data, filename, .. } => {
                debug!(filename = ?filename, size = data.len(), "Adding torrent from descriptor");
                RqbitAddTorrent::from_bytes(data)
            }
        };

        // Each job owns its output folder, so existing files there are ours
        // to resume.
        let opts = AddTorrentOptions {
            output_folder,
            overwrite: true,
            ..Default::default()
        };

        // DHT lookup for rare magnets can take forever
        let response = tokio::time::timeout(ADD_TIMEOUT, self.session.add_torrent(add_torrent, Some(opts)))
            .await
            .map_err(|_| TorrentClientError::Timeout)?
            .map_err(|e| TorrentClientError::ApiError(format!("Failed to add torrent: {}", e)))?;

        let (handle, already_managed) = match response {
            AddTorrentResponse::Added(_, handle) => (handle, false),
            AddTorrentResponse::AlreadyManaged(_, handle) => (handle, true),
            AddTorrentResponse::ListOnly(_) => {
                return Err(TorrentClientError::ApiError(
                    "Torrent was added in list-only mode".to_string(),
                ))
            }
        };

        let hash = Self::format_hash(&handle.info_hash());
        let name = handle.name().map(|s| s.to_string());
        if let Some(ref n) = name {
            self.name_cache
                .write()
                .await
                .insert(hash.clone(), n.clone());
        }

        debug!(hash = %hash, name = ?name, already_managed, "Torrent added");

        Ok(AddTorrentResult {
            hash,
            name,
            already_managed,
        })
    }

    async fn get_torrent(&self, hash: &str) -> Result<TorrentInfo, TorrentClientError> {
        let torrent = self
            .find_torrent(hash)
            .ok_or_else(|| TorrentClientError::TorrentNotFound(hash.to_string()))?;

        Ok(self.torrent_to_info(&torrent).await)
    }

    async fn remove_torrent(
        &self,
        hash: &str,
        delete_files: bool,
    ) -> Result<(), TorrentClientError> {
        let torrent = self
            .find_torrent(hash)
            .ok_or_else(|| TorrentClientError::TorrentNotFound(hash.to_string()))?;

        self.session
            .delete(torrent.id().into(), delete_files)
            .await
            .map_err(|e| {
                TorrentClientError::ApiError(format!("Failed to remove torrent: {}", e))
            })?;

        self.name_cache.write().await.remove(hash);

        debug!(hash = %hash, delete_files = delete_files, "Torrent removed");

        Ok(())
    }
}
