//! Types for torrent client operations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during torrent client operations.
#[derive(Debug, Error)]
pub enum TorrentClientError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Torrent not found: {0}")]
    TorrentNotFound(String),

    #[error("Invalid torrent data: {0}")]
    InvalidTorrent(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Request timeout")]
    Timeout,
}

/// State of a torrent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TorrentState {
    /// Downloading from peers.
    Downloading,
    /// All pieces present, seeding to peers.
    Seeding,
    /// Download is paused.
    Paused,
    /// Checking file integrity / fetching metadata.
    Checking,
    /// Error state.
    Error,
}

impl TorrentState {
    /// Returns the string representation for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            TorrentState::Downloading => "downloading",
            TorrentState::Seeding => "seeding",
            TorrentState::Paused => "paused",
            TorrentState::Checking => "checking",
            TorrentState::Error => "error",
        }
    }
}

/// Information about a torrent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TorrentInfo {
    /// Info hash (lowercase hex).
    pub hash: String,
    /// Torrent name.
    pub name: String,
    /// Current state.
    pub state: TorrentState,
    /// Download progress (0.0 - 1.0).
    pub progress: f64,
    /// Total size in bytes.
    pub size_bytes: u64,
    /// Downloaded bytes.
    pub downloaded_bytes: u64,
    /// Uploaded bytes.
    pub uploaded_bytes: u64,
    /// Current download speed in bytes/second.
    pub download_speed: u64,
    /// Current upload speed in bytes/second.
    pub upload_speed: u64,
    /// Connected peers.
    pub peers: u32,
    /// Ratio (uploaded/downloaded).
    pub ratio: f64,
    /// ETA in seconds (None if unknown or complete).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_secs: Option<u64>,
    /// Save path on disk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub save_path: Option<String>,
    /// Error reported by the client, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TorrentInfo {
    /// Whether every piece has been downloaded.
    pub fn is_complete(&self) -> bool {
        self.state == TorrentState::Seeding || self.progress >= 1.0
    }
}

/// Request to add a new torrent.
#[derive(Debug, Clone)]
pub enum AddTorrentRequest {
    /// Add via magnet URI.
    Magnet {
        /// Magnet URI.
        uri: String,
        /// Optional download path override.
        download_path: Option<String>,
    },
    /// Add via .torrent file contents.
    TorrentFile {
        /// Raw .torrent file bytes.
        data: Vec<u8>,
        /// Original filename (for logging).
        filename: Option<String>,
        /// Optional download path override.
        download_path: Option<String>,
    },
}

impl AddTorrentRequest {
    /// Create a magnet request with default options.
    pub fn magnet(uri: impl Into<String>) -> Self {
        AddTorrentRequest::Magnet {
            uri: uri.into(),
            download_path: None,
        }
    }

    /// Create a torrent file request with default options.
    pub fn torrent_file(data: Vec<u8>) -> Self {
        AddTorrentRequest::TorrentFile {
            data,
            filename: None,
            download_path: None,
        }
    }

    /// Set the download path.
    pub fn with_download_path(mut self, path: impl Into<String>) -> Self {
        match &mut self {
            AddTorrentRequest::Magnet { download_path, .. } => {
                *download_path = Some(path.into());
            }
            AddTorrentRequest::TorrentFile { download_path, .. } => {
                *download_path = Some(path.into());
            }
        }
        self
    }

    /// Set the descriptor filename (only meaningful for torrent files).
    pub fn with_filename(mut self, name: impl Into<String>) -> Self {
        if let AddTorrentRequest::TorrentFile { filename, .. } = &mut self {
            *filename = Some(name.into());
        }
        self
    }

    pub fn download_path(&self) -> Option<&str> {
        match self {
            AddTorrentRequest::Magnet { download_path, .. }
            | AddTorrentRequest::TorrentFile { download_path, .. } => download_path.as_deref(),
        }
    }
}

/// Result of adding a torrent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddTorrentResult {
    /// Info hash of the added torrent.
    pub hash: String,
    /// Name of the torrent (may be unknown for magnets initially).
    pub name: Option<String>,
    /// The torrent was already registered with the client.
    pub already_managed: bool,
}

/// Trait for torrent client backends.
#[async_trait]
pub trait TorrentClient: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Add a new torrent.
    async fn add_torrent(
        &self,
        request: AddTorrentRequest,
    ) -> Result<AddTorrentResult, TorrentClientError>;

    /// Get a specific torrent by hash.
    async fn get_torrent(&self, hash: &str) -> Result<TorrentInfo, TorrentClientError>;

    /// Remove a torrent.
    /// If `delete_files` is true, also delete downloaded files.
    async fn remove_torrent(&self, hash: &str, delete_files: bool)
        -> Result<(), TorrentClientError>;
}
