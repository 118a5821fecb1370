//! Storage layout: where artifacts live and how they are addressed publicly.

use std::path::{Path, PathBuf};

use crate::config::StorageConfig;
use crate::job::Job;

/// Name of the peer-transport working area inside the peer root.
pub const STAGING_DIR: &str = ".staging";

/// Two independent artifact roots, each served under its own URL prefix.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    http_dir: PathBuf,
    peer_dir: PathBuf,
    http_url_prefix: String,
    peer_url_prefix: String,
}

impl StorageLayout {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            http_dir: config.http_dir.clone(),
            peer_dir: config.peer_dir.clone(),
            http_url_prefix: config.http_url_prefix.trim_end_matches('/').to_string(),
            peer_url_prefix: config.peer_url_prefix.trim_end_matches('/').to_string(),
        }
    }

    /// Create both roots and the staging area.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.http_dir)?;
        std::fs::create_dir_all(&self.peer_dir)?;
        std::fs::create_dir_all(self.staging_root())?;
        Ok(())
    }

    pub fn http_dir(&self) -> &Path {
        &self.http_dir
    }

    pub fn peer_dir(&self) -> &Path {
        &self.peer_dir
    }

    pub fn root_for(&self, is_peer_transport: bool) -> &Path {
        if is_peer_transport {
            &self.peer_dir
        } else {
            &self.http_dir
        }
    }

    /// Artifact path, fully determined by filename and transport.
    pub fn artifact_path(&self, job: &Job) -> PathBuf {
        self.root_for(job.is_peer_transport).join(&job.filename)
    }

    pub fn staging_root(&self) -> PathBuf {
        self.peer_dir.join(STAGING_DIR)
    }

    /// Per-job working directory for the peer transport.
    pub fn staging_dir(&self, job_id: &str) -> PathBuf {
        self.staging_root().join(job_id)
    }

    /// Public URL of an artifact.
    pub fn download_url(&self, is_peer_transport: bool, filename: &str) -> String {
        let prefix = if is_peer_transport {
            &self.peer_url_prefix
        } else {
            &self.http_url_prefix
        };
        format!("{}/{}", prefix, urlencoding::encode(filename))
    }

    /// Bytes already on disk for a job (0 if nothing is there).
    pub fn existing_size(&self, job: &Job) -> u64 {
        std::fs::metadata(self.artifact_path(job))
            .map(|m| m.len())
            .unwrap_or(0)
    }

    /// Remove a job's artifact and, for peer jobs, its staging directory.
    ///
    /// Returns `Ok(false)` when there was nothing to delete.
    pub fn remove_artifact(&self, job: &Job) -> std::io::Result<bool> {
        let mut removed = false;
        match std::fs::remove_file(self.artifact_path(job)) {
            Ok(()) => removed = true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        if job.is_peer_transport {
            match std::fs::remove_dir_all(self.staging_dir(&job.id)) {
                Ok(()) => removed = true,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(removed)
    }
}
