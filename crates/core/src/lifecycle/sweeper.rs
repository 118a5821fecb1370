//! Periodic maintenance loops over the job registry and the storage roots.

use std::collections::HashSet;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::fs;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::job::JobState;
use crate::metrics;
use crate::orchestrator::DownloadOrchestrator;
use crate::storage::{StorageLayout, STAGING_DIR};

use super::config::SweeperConfig;

/// What one reconciliation pass removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Files in a storage root that no job claims.
    pub orphan_files: usize,
    /// Staging directories of jobs that no longer exist.
    pub orphan_staging: usize,
    /// COMPLETED jobs whose artifact disappeared.
    pub missing_artifacts: usize,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.orphan_files == 0 && self.orphan_staging == 0 && self.missing_artifacts == 0
    }
}

/// Runs the stuck check, expiry sweep, reconciliation and snapshot loops.
pub struct LifecycleSweeper {
    orchestrator: DownloadOrchestrator,
    config: SweeperConfig,
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
}

impl LifecycleSweeper {
    pub fn new(orchestrator: DownloadOrchestrator, config: SweeperConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            orchestrator,
            config,
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Run the startup expiry sweep, then spawn the loops.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Sweeper already running");
            return;
        }

        info!("Starting lifecycle sweeper");

        let expired = self.orchestrator.expire_jobs(Utc::now()).await;
        if expired > 0 {
            info!("Startup sweep removed {} expired downloads", expired);
        }

        self.spawn_loop(
            "stuck check",
            self.config.stuck_check_interval_secs,
            |orchestrator| async move {
                orchestrator.check_stuck(Utc::now()).await;
            },
        );
        self.spawn_loop(
            "expiry",
            self.config.expiry_interval_secs,
            |orchestrator| async move {
                orchestrator.expire_jobs(Utc::now()).await;
            },
        );
        self.spawn_loop(
            "reconcile",
            self.config.reconcile_interval_secs,
            |orchestrator| async move {
                reconcile(&orchestrator).await;
            },
        );
        self.spawn_loop(
            "snapshot",
            self.config.snapshot_interval_secs,
            |orchestrator| async move {
                if let Err(e) = orchestrator.registry().save_snapshot() {
                    error!(error = %e, "Failed to save snapshot");
                }
            },
        );

        info!("Lifecycle sweeper started");
    }

    /// Stop the loops and write a final snapshot.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Sweeper not running");
            return;
        }

        info!("Stopping lifecycle sweeper");
        let _ = self.shutdown_tx.send(());

        match self.orchestrator.registry().save_snapshot() {
            Ok(()) => info!(
                path = %self.orchestrator.registry().snapshot_path().display(),
                jobs = self.orchestrator.registry().len(),
                "Final snapshot written"
            ),
            Err(e) => error!(error = %e, "Failed to write final snapshot"),
        }
    }

    /// Run a single reconciliation pass now.
    pub async fn reconcile(&self) -> ReconcileReport {
        reconcile(&self.orchestrator).await
    }

    fn spawn_loop<F, Fut>(&self, name: &'static str, interval_secs: u64, tick: F)
    where
        F: Fn(DownloadOrchestrator) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let running = Arc::clone(&self.running);
        let orchestrator = self.orchestrator.clone();
        let period = Duration::from_secs(interval_secs);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            debug!("{} loop started", name);
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!("{} loop received shutdown signal", name);
                        break;
                    }
                    _ = tokio::time::sleep(period) => {
                        if !running.load(Ordering::Relaxed) {
                            break;
                        }
                        tick(orchestrator.clone()).await;
                    }
                }
            }
            debug!("{} loop stopped", name);
        });
    }
}

/// Bring the registry and both storage roots back into agreement.
async fn reconcile(orchestrator: &DownloadOrchestrator) -> ReconcileReport {
    let registry = orchestrator.registry();
    let storage = orchestrator.storage();
    let mut report = ReconcileReport::default();

    let missing = registry.filter(|job| {
        job.state == JobState::Completed && !storage.artifact_path(job).exists()
    });
    for job in &missing {
        if registry.remove(&job.id).is_some() {
            report.missing_artifacts += 1;
            metrics::RECONCILED_TOTAL
                .with_label_values(&["missing_artifact"])
                .inc();
            warn!(job_id = %job.id, filename = %job.filename, "Removed completed job with missing artifact");
        }
    }

    let scan = scan_storage(storage).await;
    remove_orphans(orchestrator, scan, &mut report).await;

    if report.missing_artifacts > 0 {
        if let Err(e) = registry.save_snapshot() {
            error!(error = %e, "Failed to save snapshot after reconciliation");
        }
    }
    if !report.is_empty() {
        info!(
            orphan_files = report.orphan_files,
            orphan_staging = report.orphan_staging,
            missing_artifacts = report.missing_artifacts,
            "Reconciliation pass finished"
        );
    }
    report
}

/// Entries found on disk by one reconciliation scan.
#[derive(Debug, Default)]
struct DiskScan {
    /// Top-level files of both storage roots.
    files: Vec<PathBuf>,
    /// Staging area entries, with whether each is a directory.
    staging: Vec<(PathBuf, bool)>,
}

async fn scan_storage(storage: &StorageLayout) -> DiskScan {
    let mut scan = DiskScan::default();
    for root in [storage.http_dir(), storage.peer_dir()] {
        match list_dir(root).await {
            Ok(entries) => scan
                .files
                .extend(entries.into_iter().filter(|(_, is_dir)| !is_dir).map(|(path, _)| path)),
            Err(e) => warn!(root = %root.display(), error = %e, "Failed to scan storage root"),
        }
    }

    let staging_root = storage.staging_root();
    match list_dir(&staging_root).await {
        Ok(entries) => scan.staging = entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(dir = %staging_root.display(), error = %e, "Failed to scan staging area"),
    }
    scan
}

/// Delete scanned entries that no job claims.
///
/// Claims are read after the scan. Jobs are registered before their files
/// are created, so anything a live job wrote during the scan is claimed.
async fn remove_orphans(
    orchestrator: &DownloadOrchestrator,
    scan: DiskScan,
    report: &mut ReconcileReport,
) {
    let storage = orchestrator.storage();
    let jobs = orchestrator.registry().list();
    let claimed: HashSet<PathBuf> = jobs
        .values()
        .map(|job| storage.artifact_path(job))
        .collect();

    for path in scan.files {
        if claimed.contains(&path) {
            continue;
        }
        match fs::remove_file(&path).await {
            Ok(()) => {
                report.orphan_files += 1;
                metrics::RECONCILED_TOTAL
                    .with_label_values(&["orphan_file"])
                    .inc();
                info!(file = %path.display(), "Removed orphaned file");
            }
            Err(e) => warn!(file = %path.display(), error = %e, "Failed to remove orphaned file"),
        }
    }

    for (path, is_dir) in scan.staging {
        let known = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|id| jobs.contains_key(id));
        if known {
            continue;
        }
        let result = if is_dir {
            fs::remove_dir_all(&path).await
        } else {
            fs::remove_file(&path).await
        };
        match result {
            Ok(()) => {
                report.orphan_staging += 1;
                metrics::RECONCILED_TOTAL
                    .with_label_values(&["orphan_staging"])
                    .inc();
                info!(dir = %path.display(), "Removed orphaned staging entry");
            }
            Err(e) => warn!(dir = %path.display(), error = %e, "Failed to remove staging entry"),
        }
    }
}

/// Top-level entries of `dir` except the staging area, with whether each is a directory.
async fn list_dir(dir: &Path) -> io::Result<Vec<(PathBuf, bool)>> {
    let mut entries = Vec::new();
    let mut reader = fs::read_dir(dir).await?;
    while let Some(entry) = reader.next_entry().await? {
        if entry.file_name() == STAGING_DIR {
            continue;
        }
        let is_dir = entry.file_type().await?.is_dir();
        entries.push((entry.path(), is_dir));
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::orchestrator::{OrchestratorConfig, OrchestratorDeps};
    use crate::registry::JobRegistry;
    use crate::resolver::MirrorResolver;
    use crate::storage::StorageLayout;
    use crate::testing::{fixtures, ScriptedBackend};
    use tempfile::TempDir;

    fn setup() -> (TempDir, DownloadOrchestrator) {
        let dir = TempDir::new().unwrap();
        let storage = StorageLayout::new(&StorageConfig {
            http_dir: dir.path().join("uploads"),
            peer_dir: dir.path().join("torrents"),
            ..Default::default()
        });
        storage.ensure_dirs().unwrap();
        let orchestrator = DownloadOrchestrator::new(
            OrchestratorConfig::default(),
            OrchestratorDeps {
                registry: Arc::new(JobRegistry::new(dir.path().join("downloads.json"))),
                storage,
                mirror: MirrorResolver::disabled(),
                probe: None,
                filename_prefix: "NexusDrop".to_string(),
                http: Arc::new(ScriptedBackend::new("http")),
                peer: None,
            },
        );
        (dir, orchestrator)
    }

    #[tokio::test]
    async fn test_reconcile_removes_orphans() {
        let (_dir, orchestrator) = setup();
        let storage = orchestrator.storage().clone();

        let mut kept = fixtures::http_job("kept", "https://example.com/kept.bin");
        kept.state = JobState::Completed;
        std::fs::write(storage.artifact_path(&kept), b"data").unwrap();
        orchestrator.registry().insert(kept.clone()).unwrap();

        std::fs::write(storage.http_dir().join("stray.bin"), b"x").unwrap();
        std::fs::write(storage.peer_dir().join("stray.mkv"), b"x").unwrap();
        std::fs::create_dir_all(storage.staging_dir("gone")).unwrap();

        let report = reconcile(&orchestrator).await;
        assert_eq!(report.orphan_files, 2);
        assert_eq!(report.orphan_staging, 1);
        assert_eq!(report.missing_artifacts, 0);

        assert!(storage.artifact_path(&kept).exists());
        assert!(!storage.http_dir().join("stray.bin").exists());
        assert!(!storage.staging_dir("gone").exists());
        assert!(storage.staging_root().exists());
    }

    #[tokio::test]
    async fn test_reconcile_drops_completed_job_without_artifact() {
        let (_dir, orchestrator) = setup();

        let mut done = fixtures::http_job("done", "https://example.com/done.bin");
        done.state = JobState::Completed;
        orchestrator.registry().insert(done).unwrap();

        let mut failed = fixtures::http_job("failed", "https://example.com/failed.bin");
        failed.state = JobState::Error;
        orchestrator.registry().insert(failed).unwrap();

        let report = reconcile(&orchestrator).await;
        assert_eq!(report.missing_artifacts, 1);
        assert!(orchestrator.registry().get("done").is_none());
        assert!(orchestrator.registry().get("failed").is_some());
        assert!(orchestrator.registry().snapshot_path().exists());
    }

    #[tokio::test]
    async fn test_files_of_jobs_registered_during_scan_are_kept() {
        let (_dir, orchestrator) = setup();
        let storage = orchestrator.storage().clone();

        let http = fixtures::http_job("fresh", "https://example.com/fresh.bin");
        let peer = fixtures::peer_job("peer1", "0123456789abcdef0123456789abcdef01234567");
        std::fs::write(storage.artifact_path(&http), b"partial").unwrap();
        std::fs::create_dir_all(storage.staging_dir(&peer.id)).unwrap();

        let scan = scan_storage(&storage).await;
        assert_eq!(scan.files.len(), 1);
        assert_eq!(scan.staging.len(), 1);

        // Both downloads start between the scan and the removal step.
        orchestrator.registry().insert(http.clone()).unwrap();
        orchestrator.registry().insert(peer.clone()).unwrap();

        let mut report = ReconcileReport::default();
        remove_orphans(&orchestrator, scan, &mut report).await;
        assert!(report.is_empty());
        assert!(storage.artifact_path(&http).exists());
        assert!(storage.staging_dir(&peer.id).exists());
    }

    #[tokio::test]
    async fn test_reconcile_keeps_active_staging() {
        let (_dir, orchestrator) = setup();
        let storage = orchestrator.storage().clone();

        let job = fixtures::peer_job("peer1", "0123456789abcdef0123456789abcdef01234567");
        std::fs::create_dir_all(storage.staging_dir(&job.id)).unwrap();
        orchestrator.registry().insert(job.clone()).unwrap();

        let report = reconcile(&orchestrator).await;
        assert!(report.is_empty());
        assert!(storage.staging_dir(&job.id).exists());
    }

    #[tokio::test]
    async fn test_start_sweeps_expired_and_stop_writes_snapshot() {
        let (_dir, orchestrator) = setup();
        let mut old = fixtures::http_job("old", "https://example.com/old.bin");
        old.state = JobState::Completed;
        old.expires_at = Utc::now() - chrono::Duration::minutes(1);
        std::fs::write(orchestrator.storage().artifact_path(&old), b"x").unwrap();
        orchestrator.registry().insert(old.clone()).unwrap();

        let sweeper = LifecycleSweeper::new(orchestrator.clone(), SweeperConfig::default());
        sweeper.start().await;
        assert!(sweeper.is_running());
        assert!(orchestrator.registry().get("old").is_none());
        assert!(!orchestrator.storage().artifact_path(&old).exists());

        sweeper.stop().await;
        assert!(!sweeper.is_running());
        let saved = crate::registry::read_snapshot(orchestrator.registry().snapshot_path()).unwrap();
        assert!(saved.is_empty());
    }
}
