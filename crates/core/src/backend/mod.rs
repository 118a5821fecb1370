//! Transport backends.
//!
//! Both transports implement [`DownloadBackend`] so the orchestrator drives
//! them through a single lifecycle.

mod http;
mod torrent;
mod types;

pub use http::HttpBackend;
pub use torrent::{TorrentBackend, UploadError, UploadedResource};
pub use types::*;
