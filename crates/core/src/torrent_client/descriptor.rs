//! `.torrent` descriptor parsing.
//!
//! Uses librqbit-core to decode the bencoded metainfo and extract the info
//! hash, display name, file listing and trackers without touching the swarm.

use librqbit_buffers::ByteBufOwned;
use librqbit_core::torrent_metainfo::{torrent_from_bytes, TorrentMetaV1Owned};
use serde::Serialize;
use thiserror::Error;

/// Errors that can occur when parsing descriptors.
#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("Failed to parse torrent: {0}")]
    ParseError(String),

    #[error("Empty torrent (no files)")]
    EmptyTorrent,
}

/// One file listed in a descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DescriptorFile {
    pub path: String,
    pub size_bytes: u64,
}

/// What a descriptor tells us about its content.
#[derive(Debug, Clone)]
pub struct Descriptor {
    /// Lowercase hex info hash.
    pub info_hash: String,
    pub name: String,
    pub files: Vec<DescriptorFile>,
    pub trackers: Vec<String>,
}

impl Descriptor {
    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size_bytes).sum()
    }
}

/// Parse a .torrent file.
///
/// Supports both single-file and multi-file torrents.
pub fn parse_descriptor(bytes: &[u8]) -> Result<Descriptor, DescriptorError> {
    let torrent: TorrentMetaV1Owned =
        torrent_from_bytes(bytes).map_err(|e| DescriptorError::ParseError(e.to_string()))?;

    let info = &torrent.info;

    // Folder name for multi-file, file name for single-file
    let root_name = info
        .name
        .as_ref()
        .map(buf_to_string)
        .unwrap_or_else(|| "unknown".to_string());

    let files = if let Some(ref files) = info.files {
        files
            .iter()
            .map(|file| {
                let mut parts = vec![root_name.clone()];
                parts.extend(file.path.iter().map(buf_to_string));
                DescriptorFile {
                    path: parts.join("/"),
                    size_bytes: file.length,
                }
            })
            .collect::<Vec<_>>()
    } else if let Some(length) = info.length {
        vec![DescriptorFile {
            path: root_name.clone(),
            size_bytes: length,
        }]
    } else {
        Vec::new()
    };

    if files.is_empty() {
        return Err(DescriptorError::EmptyTorrent);
    }

    let mut trackers: Vec<String> = Vec::new();
    for tracker in torrent.iter_announce() {
        let tracker = bytes_to_string(tracker.as_ref());
        if !tracker.is_empty() && !trackers.contains(&tracker) {
            trackers.push(tracker);
        }
    }

    Ok(Descriptor {
        info_hash: torrent.info_hash.as_string(),
        name: root_name,
        files,
        trackers,
    })
}

fn buf_to_string(buf: &ByteBufOwned) -> String {
    bytes_to_string(buf.as_ref())
}

/// UTF-8 with lossy fallback.
fn bytes_to_string(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}
