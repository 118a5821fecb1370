//! Peer-swarm transport.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{DownloadBackend, FetchError, ProgressCallback};
use crate::config::TorrentConfig;
use crate::job::{Job, ProgressUpdate, TransportTelemetry};
use crate::metrics;
use crate::resolver::{build_magnet_uri, parse_magnet};
use crate::storage::StorageLayout;
use crate::torrent_client::{
    parse_descriptor, AddTorrentRequest, DescriptorError, DescriptorFile, TorrentClient,
    TorrentClientError, TorrentState,
};

/// Errors from descriptor uploads.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Only .torrent files are accepted: {0}")]
    NotDescriptor(String),

    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
}

/// A descriptor converted into a fetchable resource.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedResource {
    pub resource_uri: String,
    pub resource_id: String,
    pub name: String,
    pub files: Vec<DescriptorFile>,
}

/// A resource currently being fetched by some job.
#[derive(Debug, Clone)]
struct ActiveResource {
    job_id: String,
    /// Known once the swarm client accepted the resource.
    hash: Option<String>,
}

/// Fetches magnet resources through a [`TorrentClient`].
///
/// At most one job may fetch a given resource at a time. Each job downloads
/// into its own staging directory; on completion the largest file becomes
/// the job's artifact and everything else is discarded.
pub struct TorrentBackend {
    client: Arc<dyn TorrentClient>,
    storage: StorageLayout,
    poll_interval: Duration,
    trackers: Vec<String>,
    active: Mutex<HashMap<String, ActiveResource>>,
    /// Uploaded descriptors by info hash.
    descriptors: RwLock<HashMap<String, Vec<u8>>>,
}

impl TorrentBackend {
    pub fn new(client: Arc<dyn TorrentClient>, storage: StorageLayout, config: &TorrentConfig) -> Self {
        Self {
            client,
            storage,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            trackers: config.trackers.clone(),
            active: Mutex::new(HashMap::new()),
            descriptors: RwLock::new(HashMap::new()),
        }
    }

    fn active(&self) -> MutexGuard<'_, HashMap<String, ActiveResource>> {
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn resource_id(job: &Job) -> String {
        job.resource_id
            .clone()
            .unwrap_or_else(|| parse_magnet(&job.source_url).resource_id(&job.source_url))
    }

    /// Whether some job is currently fetching `resource_id`.
    pub fn is_active(&self, resource_id: &str) -> bool {
        self.active().contains_key(resource_id)
    }

    /// Register `job_id` as the fetcher of `resource_id`.
    ///
    /// Returns the swarm hash when the same job is re-attaching to a
    /// resource it already holds.
    fn claim(&self, resource_id: &str, job_id: &str) -> Result<Option<String>, FetchError> {
        let mut active = self.active();
        match active.get(resource_id) {
            Some(entry) if entry.job_id != job_id => {
                metrics::DUPLICATE_REJECTIONS_TOTAL.inc();
                Err(FetchError::DuplicateActiveResource(resource_id.to_string()))
            }
            Some(entry) => Ok(entry.hash.clone()),
            None => {
                active.insert(
                    resource_id.to_string(),
                    ActiveResource {
                        job_id: job_id.to_string(),
                        hash: None,
                    },
                );
                Ok(None)
            }
        }
    }

    fn set_hash(&self, resource_id: &str, job_id: &str, hash: &str) {
        if let Some(entry) = self.active().get_mut(resource_id) {
            if entry.job_id == job_id {
                entry.hash = Some(hash.to_string());
            }
        }
    }

    /// Drop the claim if `job_id` holds it.
    fn release(&self, resource_id: &str, job_id: &str) -> Option<ActiveResource> {
        let mut active = self.active();
        match active.get(resource_id) {
            Some(entry) if entry.job_id == job_id => active.remove(resource_id),
            _ => None,
        }
    }

    async fn remove_from_swarm(&self, hash: &str) {
        match self.client.remove_torrent(hash, false).await {
            Ok(()) => debug!(hash = %hash, "Removed torrent from swarm"),
            Err(TorrentClientError::TorrentNotFound(_)) => {}
            Err(e) => warn!(hash = %hash, error = %e, "Failed to remove torrent from swarm"),
        }
    }

    /// Convert an uploaded `.torrent` into a magnet URI that jobs can fetch.
    pub fn upload_resource(
        &self,
        data: &[u8],
        filename: &str,
    ) -> Result<UploadedResource, UploadError> {
        if !filename.to_ascii_lowercase().ends_with(".torrent") {
            return Err(UploadError::NotDescriptor(filename.to_string()));
        }

        let descriptor = parse_descriptor(data)?;

        let mut trackers = descriptor.trackers.clone();
        for tracker in &self.trackers {
            if !trackers.contains(tracker) {
                trackers.push(tracker.clone());
            }
        }
        let resource_uri =
            build_magnet_uri(&descriptor.info_hash, Some(&descriptor.name), &trackers);

        self.descriptors
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(descriptor.info_hash.clone(), data.to_vec());

        info!(
            info_hash = %descriptor.info_hash,
            name = %descriptor.name,
            files = descriptor.files.len(),
            "Registered uploaded descriptor"
        );

        Ok(UploadedResource {
            resource_uri,
            resource_id: descriptor.info_hash,
            name: descriptor.name,
            files: descriptor.files,
        })
    }

    fn cached_descriptor(&self, info_hash: &str) -> Option<Vec<u8>> {
        self.descriptors
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(info_hash)
            .cloned()
    }

    async fn run(
        &self,
        job: &Job,
        resource_id: &str,
        known_hash: Option<String>,
        on_progress: ProgressCallback,
        cancel: &CancellationToken,
    ) -> Result<(), FetchError> {
        let staging = self.storage.staging_dir(&job.id);
        fs::create_dir_all(&staging).await?;

        let hash = match known_hash {
            Some(hash) => {
                debug!(job_id = %job.id, hash = %hash, "Re-attaching to active torrent");
                hash
            }
            None => {
                let request = match self.cached_descriptor(resource_id) {
                    Some(data) => AddTorrentRequest::torrent_file(data)
                        .with_filename(job.original_filename.clone()),
                    None => AddTorrentRequest::magnet(job.source_url.clone()),
                }
                .with_download_path(staging.display().to_string());

                let added = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                    added = self.client.add_torrent(request) => added,
                };
                let added = added.map_err(|e| FetchError::Swarm(e.to_string()))?;
                self.set_hash(resource_id, &job.id, &added.hash);
                info!(
                    job_id = %job.id,
                    hash = %added.hash,
                    client = self.client.name(),
                    already_managed = added.already_managed,
                    "Torrent added"
                );
                added.hash
            }
        };

        let mut ticker = tokio::time::interval(self.poll_interval);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                _ = ticker.tick() => {}
            }

            let info = self
                .client
                .get_torrent(&hash)
                .await
                .map_err(|e| FetchError::Swarm(e.to_string()))?;

            if info.state == TorrentState::Error {
                return Err(FetchError::Swarm(
                    info.error
                        .unwrap_or_else(|| "torrent entered error state".to_string()),
                ));
            }

            on_progress(ProgressUpdate {
                downloaded_bytes: info.downloaded_bytes,
                total_bytes: (info.size_bytes > 0).then_some(info.size_bytes),
                progress_percent: (info.progress * 100.0).clamp(0.0, 100.0),
                speed_bytes_per_sec: info.download_speed,
                telemetry: Some(TransportTelemetry {
                    peers: info.peers,
                    ratio: info.ratio,
                    uploaded_bytes: info.uploaded_bytes,
                    upload_speed: info.upload_speed,
                    time_remaining: info.eta_secs,
                }),
            });

            if info.is_complete() {
                break;
            }
        }

        // Release file handles before moving files around.
        self.remove_from_swarm(&hash).await;
        self.finalize(job, &staging).await?;

        self.descriptors
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(resource_id);
        Ok(())
    }

    /// Keep the largest downloaded file as the artifact; discard the rest.
    async fn finalize(&self, job: &Job, staging: &Path) -> Result<(), FetchError> {
        let dir = staging.to_path_buf();
        let files = tokio::task::spawn_blocking(move || collect_files(&dir))
            .await
            .map_err(|e| FetchError::Swarm(format!("file scan failed: {}", e)))??;

        let (largest, size) = files
            .iter()
            .max_by_key(|(_, len)| *len)
            .cloned()
            .ok_or_else(|| FetchError::Swarm("torrent produced no files".to_string()))?;

        let target = self.storage.artifact_path(job);
        fs::rename(&largest, &target).await?;
        info!(
            job_id = %job.id,
            file = %largest.display(),
            size,
            target = %target.display(),
            "Torrent artifact moved into place"
        );

        for (path, _) in files.iter().filter(|(path, _)| *path != largest) {
            if let Err(e) = fs::remove_file(path).await {
                warn!(job_id = %job.id, file = %path.display(), error = %e, "Failed to remove torrent file");
            }
        }
        if let Err(e) = fs::remove_dir_all(staging).await {
            warn!(job_id = %job.id, dir = %staging.display(), error = %e, "Failed to remove staging directory");
        }
        Ok(())
    }
}

/// Every regular file below `dir`, with its size.
fn collect_files(dir: &Path) -> std::io::Result<Vec<(PathBuf, u64)>> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in std::fs::read_dir(&current)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                pending.push(entry.path());
            } else if file_type.is_file() {
                files.push((entry.path(), entry.metadata()?.len()));
            }
        }
    }
    Ok(files)
}

#[async_trait]
impl DownloadBackend for TorrentBackend {
    fn name(&self) -> &str {
        "torrent"
    }

    async fn start_download(
        &self,
        job: &Job,
        on_progress: ProgressCallback,
        cancel: CancellationToken,
    ) -> Result<(), FetchError> {
        let resource_id = Self::resource_id(job);
        let known_hash = self.claim(&resource_id, &job.id)?;

        let result = self
            .run(job, &resource_id, known_hash, on_progress, &cancel)
            .await;

        if let Some(entry) = self.release(&resource_id, &job.id) {
            if result.is_err() {
                if let Some(hash) = entry.hash {
                    self.remove_from_swarm(&hash).await;
                }
            }
        }
        result
    }

    async fn cancel(&self, job: &Job) {
        let resource_id = Self::resource_id(job);
        if let Some(hash) = self
            .release(&resource_id, &job.id)
            .and_then(|entry| entry.hash)
        {
            self.remove_from_swarm(&hash).await;
        }
    }
}
