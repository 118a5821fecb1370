//! Mock torrent client for testing.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;

use crate::torrent_client::{
    AddTorrentRequest, AddTorrentResult, TorrentClient, TorrentClientError, TorrentInfo,
    TorrentState,
};

/// A recorded torrent addition for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedAddTorrent {
    /// The request that was made.
    pub request: AddTorrentRequest,
    /// When the request was made.
    pub timestamp: chrono::DateTime<Utc>,
}

/// Mock implementation of the TorrentClient trait.
///
/// Provides controllable behavior for testing:
/// - Track added torrents for assertions
/// - Control torrent progress/state
/// - Simulate failures
///
/// # Example
///
/// ```rust,ignore
/// let client = MockTorrentClient::new();
/// client.add_torrent(AddTorrentRequest::magnet("magnet:?xt=urn:btih:abc")).await?;
///
/// client.set_progress("abc", 0.5).await;
/// client.set_progress("abc", 1.0).await; // Complete
///
/// let info = client.get_torrent("abc").await?;
/// assert_eq!(info.state, TorrentState::Seeding);
/// ```
#[derive(Debug, Default)]
pub struct MockTorrentClient {
    /// Recorded add_torrent calls.
    added: Arc<RwLock<Vec<RecordedAddTorrent>>>,
    /// Current torrent states by hash.
    torrents: Arc<RwLock<HashMap<String, TorrentInfo>>>,
    /// If set, the next operation will fail with this error.
    next_error: Arc<RwLock<Option<TorrentClientError>>>,
    /// Counter for generating unique hashes.
    hash_counter: AtomicU32,
    /// New torrents start fully downloaded.
    complete_on_add: AtomicBool,
    /// New torrents start in the error state with this message.
    fail_on_add: Mutex<Option<String>>,
}

impl MockTorrentClient {
    /// Create a new mock torrent client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequently added torrent report completion immediately.
    pub fn complete_on_add(&self, complete: bool) {
        self.complete_on_add.store(complete, Ordering::SeqCst);
    }

    /// Make every subsequently added torrent enter the error state.
    pub fn fail_on_add(&self, message: Option<String>) {
        *self
            .fail_on_add
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = message;
    }

    /// Get all recorded add_torrent calls.
    pub async fn added_torrents(&self) -> Vec<RecordedAddTorrent> {
        self.added.read().await.clone()
    }

    /// Set the progress for a torrent (0.0 to 1.0).
    ///
    /// When progress reaches 1.0, the torrent state changes to Seeding.
    pub async fn set_progress(&self, hash: &str, progress: f64) {
        let mut torrents = self.torrents.write().await;
        if let Some(info) = torrents.get_mut(hash) {
            let progress = progress.clamp(0.0, 1.0);
            info.progress = progress;
            info.downloaded_bytes = (info.size_bytes as f64 * progress) as u64;

            if progress >= 1.0 {
                info.state = TorrentState::Seeding;
                info.eta_secs = None;
            } else {
                info.state = TorrentState::Downloading;
                let remaining_bytes = info.size_bytes - info.downloaded_bytes;
                if info.download_speed > 0 {
                    info.eta_secs = Some(remaining_bytes / info.download_speed);
                }
            }
        }
    }

    /// Set the state for a torrent directly.
    pub async fn set_state(&self, hash: &str, state: TorrentState) {
        if let Some(info) = self.torrents.write().await.get_mut(hash) {
            info.state = state;
        }
    }

    /// Configure the next operation to fail with the given error.
    pub async fn set_next_error(&self, error: TorrentClientError) {
        *self.next_error.write().await = Some(error);
    }

    /// Check if a torrent exists.
    pub async fn has_torrent(&self, hash: &str) -> bool {
        self.torrents.read().await.contains_key(hash)
    }

    /// Get the number of torrents.
    pub async fn torrent_count(&self) -> usize {
        self.torrents.read().await.len()
    }

    async fn take_error(&self) -> Option<TorrentClientError> {
        self.next_error.write().await.take()
    }

    fn generate_hash(&self) -> String {
        let n = self.hash_counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("mockhash{:08x}", n)
    }

    /// Extract info hash from magnet URI if present.
    fn extract_hash_from_magnet(uri: &str) -> Option<String> {
        uri.split(['?', '&'])
            .find_map(|part| part.strip_prefix("xt=urn:btih:"))
            .map(|hash| hash.to_lowercase())
    }
}

#[async_trait]
impl TorrentClient for MockTorrentClient {
    fn name(&self) -> &str {
        "mock"
    }

    async fn add_torrent(
        &self,
        request: AddTorrentRequest,
    ) -> Result<AddTorrentResult, TorrentClientError> {
        if let Some(err) = self.take_error().await {
            return Err(err);
        }

        self.added.write().await.push(RecordedAddTorrent {
            request: request.clone(),
            timestamp: Utc::now(),
        });

        let hash = match &request {
            AddTorrentRequest::Magnet { uri, .. } => {
                Self::extract_hash_from_magnet(uri).unwrap_or_else(|| self.generate_hash())
            }
            AddTorrentRequest::TorrentFile { .. } => self.generate_hash(),
        };

        let mut torrents = self.torrents.write().await;
        if let Some(existing) = torrents.get(&hash) {
            return Ok(AddTorrentResult {
                hash,
                name: Some(existing.name.clone()),
                already_managed: true,
            });
        }

        let hash_prefix = hash.get(..8).unwrap_or(&hash);
        let name = match &request {
            AddTorrentRequest::TorrentFile {
                filename: Some(filename),
                ..
            } => filename.clone(),
            _ => format!("Mock Torrent {}", hash_prefix),
        };

        let size_bytes = 100 * 1024 * 1024;
        let complete = self.complete_on_add.load(Ordering::SeqCst);
        let failure = self
            .fail_on_add
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();

        let state = if failure.is_some() {
            TorrentState::Error
        } else if complete {
            TorrentState::Seeding
        } else {
            TorrentState::Downloading
        };

        let info = TorrentInfo {
            hash: hash.clone(),
            name: name.clone(),
            state,
            progress: if complete { 1.0 } else { 0.0 },
            size_bytes,
            downloaded_bytes: if complete { size_bytes } else { 0 },
            uploaded_bytes: 0,
            download_speed: 1024 * 1024,
            upload_speed: 256 * 1024,
            peers: 15,
            ratio: 0.0,
            eta_secs: (!complete).then_some(100),
            save_path: request.download_path().map(str::to_string),
            error: failure,
        };
        torrents.insert(hash.clone(), info);

        Ok(AddTorrentResult {
            hash,
            name: Some(name),
            already_managed: false,
        })
    }

    async fn get_torrent(&self, hash: &str) -> Result<TorrentInfo, TorrentClientError> {
        if let Some(err) = self.take_error().await {
            return Err(err);
        }

        self.torrents
            .read()
            .await
            .get(hash)
            .cloned()
            .ok_or_else(|| TorrentClientError::TorrentNotFound(hash.to_string()))
    }

    async fn remove_torrent(
        &self,
        hash: &str,
        _delete_files: bool,
    ) -> Result<(), TorrentClientError> {
        if let Some(err) = self.take_error().await {
            return Err(err);
        }

        if self.torrents.write().await.remove(hash).is_some() {
            Ok(())
        } else {
            Err(TorrentClientError::TorrentNotFound(hash.to_string()))
        }
    }
}
