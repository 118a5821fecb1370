use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use crate::lifecycle::SweeperConfig;
use crate::orchestrator::OrchestratorConfig;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub mirror: MirrorConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub torrent: TorrentConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub sweeper: SweeperConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    3001
}

/// Where artifacts and the registry snapshot live on disk.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Root for HTTP-transport artifacts.
    #[serde(default = "default_http_dir")]
    pub http_dir: PathBuf,
    /// Root for peer-transport artifacts (and their staging directories).
    #[serde(default = "default_peer_dir")]
    pub peer_dir: PathBuf,
    /// JSON snapshot of the job registry.
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,
    /// Public URL prefix under which `http_dir` is served.
    #[serde(default = "default_http_url_prefix")]
    pub http_url_prefix: String,
    /// Public URL prefix under which `peer_dir` is served.
    #[serde(default = "default_peer_url_prefix")]
    pub peer_url_prefix: String,
    /// Leading component of every on-disk artifact name.
    #[serde(default = "default_filename_prefix")]
    pub filename_prefix: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            http_dir: default_http_dir(),
            peer_dir: default_peer_dir(),
            snapshot_path: default_snapshot_path(),
            http_url_prefix: default_http_url_prefix(),
            peer_url_prefix: default_peer_url_prefix(),
            filename_prefix: default_filename_prefix(),
        }
    }
}

fn default_http_dir() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_peer_dir() -> PathBuf {
    PathBuf::from("torrents")
}

fn default_snapshot_path() -> PathBuf {
    PathBuf::from("data/downloads.json")
}

fn default_http_url_prefix() -> String {
    "/downloads".to_string()
}

fn default_peer_url_prefix() -> String {
    "/torrents".to_string()
}

fn default_filename_prefix() -> String {
    "NexusDrop".to_string()
}

/// Mirror rewrite for HTTP sources.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MirrorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Scheme and host of the mirror, e.g. `https://get.0ms.dev`.
    #[serde(default = "default_mirror_base_url")]
    pub base_url: String,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: default_mirror_base_url(),
        }
    }
}

fn default_mirror_base_url() -> String {
    "https://get.0ms.dev".to_string()
}

/// HTTP transport tuning.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpConfig {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Maximum silence between two body chunks before the fetch is failed.
    #[serde(default = "default_chunk_timeout")]
    pub chunk_timeout_secs: u64,
    /// Timeout for the metadata (HEAD) probe used for filename detection.
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            chunk_timeout_secs: default_chunk_timeout(),
            probe_timeout_secs: default_probe_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_chunk_timeout() -> u64 {
    30
}

fn default_probe_timeout() -> u64 {
    15
}

fn default_user_agent() -> String {
    format!("nexusdrop/{}", env!("CARGO_PKG_VERSION"))
}

/// Peer transport (embedded librqbit session).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TorrentConfig {
    /// When disabled, magnet jobs fail immediately and uploads are refused.
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub enable_dht: bool,
    /// Fixed TCP listen port (None = librqbit default range).
    #[serde(default)]
    pub listen_port: Option<u16>,
    /// Session persistence directory (None = no session persistence).
    #[serde(default)]
    pub persistence_path: Option<String>,
    /// How often an active torrent is polled for progress and telemetry.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Trackers appended to magnet URIs produced from uploaded descriptors.
    #[serde(default)]
    pub trackers: Vec<String>,
}

impl Default for TorrentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            enable_dht: true,
            listen_port: None,
            persistence_path: None,
            poll_interval_ms: default_poll_interval(),
            trackers: Vec::new(),
        }
    }
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

/// Config shape exposed over the API.
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub mirror: MirrorConfig,
    pub torrent_enabled: bool,
    pub http_url_prefix: String,
    pub peer_url_prefix: String,
    pub orchestrator: OrchestratorConfig,
    pub sweeper: SweeperConfig,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            server: config.server.clone(),
            mirror: config.mirror.clone(),
            torrent_enabled: config.torrent.enabled,
            http_url_prefix: config.storage.http_url_prefix.clone(),
            peer_url_prefix: config.storage.peer_url_prefix.clone(),
            orchestrator: config.orchestrator.clone(),
            sweeper: config.sweeper.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_with_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 3001);
        assert_eq!(config.server.host.to_string(), "0.0.0.0");
        assert_eq!(config.storage.http_dir.to_str().unwrap(), "uploads");
        assert_eq!(config.storage.peer_dir.to_str().unwrap(), "torrents");
        assert_eq!(
            config.storage.snapshot_path.to_str().unwrap(),
            "data/downloads.json"
        );
        assert!(config.mirror.enabled);
        assert_eq!(config.mirror.base_url, "https://get.0ms.dev");
        assert!(config.torrent.enabled);
        assert_eq!(config.torrent.poll_interval_ms, 1000);
    }

    #[test]
    fn test_deserialize_custom_sections() {
        let toml = r#"
[server]
host = "127.0.0.1"
port = 9000

[mirror]
enabled = false

[torrent]
enable_dht = false
listen_port = 4240
trackers = ["udp://tracker.example:1337/announce"]
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.port, 9000);
        assert!(!config.mirror.enabled);
        assert!(!config.torrent.enable_dht);
        assert_eq!(config.torrent.listen_port, Some(4240));
        assert_eq!(config.torrent.trackers.len(), 1);
    }

    #[test]
    fn test_sanitized_config() {
        let config = Config::default();
        let sanitized = SanitizedConfig::from(&config);
        assert_eq!(sanitized.server.port, 3001);
        assert!(sanitized.torrent_enabled);
        assert_eq!(sanitized.http_url_prefix, "/downloads");
        assert_eq!(sanitized.orchestrator.max_retries, 7);
    }
}
