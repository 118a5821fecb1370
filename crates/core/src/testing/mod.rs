//! Testing utilities and mock implementations.
//!
//! Lets the orchestrator and the API be exercised without network access
//! or a real torrent session.
//!
//! # Example
//!
//! ```rust,ignore
//! use nexusdrop_core::testing::{MockTorrentClient, ScriptedBackend, ScriptedOutcome};
//!
//! let http = ScriptedBackend::new("http");
//! http.push(ScriptedOutcome::Fail("connection reset".into()));
//!
//! let client = MockTorrentClient::new();
//! client.complete_on_add(true);
//! ```

mod mock_torrent_client;
mod scripted_backend;

pub use mock_torrent_client::{MockTorrentClient, RecordedAddTorrent};
pub use scripted_backend::{ScriptedBackend, ScriptedOutcome};

/// Test fixtures and helper functions.
pub mod fixtures {
    use chrono::{Duration, Utc};

    use crate::job::{Job, NewJob};

    /// A PENDING HTTP job expiring in an hour.
    pub fn http_job(id: &str, url: &str) -> Job {
        let now = Utc::now();
        let filename = format!("NexusDrop_TEST-{}.bin", id);
        Job::pending(NewJob {
            id: id.to_string(),
            owner_token: format!("token-{}", id),
            source_url: url.to_string(),
            effective_url: Some(url.to_string()),
            download_url: format!("/downloads/{}", filename),
            filename,
            original_filename: format!("{}.bin", id),
            is_peer_transport: false,
            resource_id: None,
            created_at: now,
            expires_at: now + Duration::hours(1),
        })
    }

    /// A PENDING torrent job for the given info hash.
    pub fn peer_job(id: &str, info_hash: &str) -> Job {
        let now = Utc::now();
        let filename = format!("NexusDrop_TEST-{}.mkv", id);
        Job::pending(NewJob {
            id: id.to_string(),
            owner_token: format!("token-{}", id),
            source_url: format!("magnet:?xt=urn:btih:{}&dn={}.mkv", info_hash, id),
            effective_url: None,
            download_url: format!("/torrents/{}", filename),
            filename,
            original_filename: format!("{}.mkv", id),
            is_peer_transport: true,
            resource_id: Some(info_hash.to_string()),
            created_at: now,
            expires_at: now + Duration::hours(1),
        })
    }

    /// Minimal single-file `.torrent` (`file.iso`, 1024 bytes), bencoded by hand.
    pub fn single_file_descriptor() -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(b"d8:announce30:udp://tracker.example:1337/ann");
        data.extend_from_slice(b"4:infod6:lengthi1024e4:name8:file.iso");
        data.extend_from_slice(b"12:piece lengthi16384e6:pieces20:");
        data.extend_from_slice(&[0u8; 20]);
        data.extend_from_slice(b"ee");
        data
    }
}
