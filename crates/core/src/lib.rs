pub mod backend;
pub mod config;
pub mod job;
pub mod lifecycle;
pub mod metrics;
pub mod orchestrator;
pub mod registry;
pub mod resolver;
pub mod storage;
pub mod testing;
pub mod torrent_client;

pub use backend::{
    DownloadBackend, FetchError, HttpBackend, ProgressCallback, TorrentBackend, UploadError,
    UploadedResource,
};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, HttpConfig,
    MirrorConfig, SanitizedConfig, ServerConfig, StorageConfig, TorrentConfig,
};
pub use job::{Job, JobState, ProgressUpdate, TransportTelemetry};
pub use lifecycle::{LifecycleSweeper, ReconcileReport, SweeperConfig};
pub use orchestrator::{
    CreateDownload, CreatedDownload, DownloadOrchestrator, OrchestratorConfig, OrchestratorDeps,
    OrchestratorError, OrchestratorStatus,
};
pub use registry::{JobRegistry, RegistryError};
pub use resolver::{FilenameProbe, MirrorResolver};
pub use storage::StorageLayout;
pub use torrent_client::{LibrqbitClient, TorrentClient, TorrentClientError};
