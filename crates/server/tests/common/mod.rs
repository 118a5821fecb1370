//! Common test utilities for API testing with mocks.
//!
//! This module provides a test fixture that creates an in-process server
//! with scripted transports injected, so the whole HTTP surface can be
//! exercised without network access or a torrent session.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use nexusdrop_core::{
    testing::{MockTorrentClient, ScriptedBackend},
    Config, DownloadOrchestrator, JobRegistry, JobState, MirrorResolver, OrchestratorConfig,
    OrchestratorDeps, StorageConfig, StorageLayout, TorrentBackend, TorrentConfig,
};
use nexusdrop_server::state::AppState;

/// Re-export fixtures for test convenience
#[allow(unused_imports)]
pub use nexusdrop_core::testing::fixtures;

const MULTIPART_BOUNDARY: &str = "nexusdrop-test-boundary";

/// Test fixture for API testing with mock dependencies.
///
/// Provides an in-process server with fully controllable transports:
/// - HTTP downloads (ScriptedBackend)
/// - Peer downloads (TorrentBackend over MockTorrentClient)
///
/// # Example
///
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_create() {
///     let fixture = TestFixture::new().await;
///
///     let response = fixture.post("/api/download", json!({
///         "url": "https://example.com/file.zip"
///     })).await;
///
///     assert_eq!(response.status, 200);
/// }
/// ```
#[allow(dead_code)]
pub struct TestFixture {
    /// The Axum router for testing
    pub router: Router,
    /// Orchestrator behind the router
    pub orchestrator: DownloadOrchestrator,
    /// Scripted HTTP transport - control attempt outcomes
    pub http: Arc<ScriptedBackend>,
    /// Mock torrent client - control peer downloads
    pub torrent_client: Arc<MockTorrentClient>,
    /// Storage roots inside `temp_dir`
    pub storage: StorageLayout,
    /// Temporary directory for artifacts and the snapshot
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
    pub text: String,
}

#[allow(dead_code)]
impl TestFixture {
    /// Create a new test fixture with default mocks.
    pub async fn new() -> Self {
        Self::with_config(TestConfig::default()).await
    }

    /// Create a test fixture with custom configuration.
    pub async fn with_config(test_config: TestConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");

        let config = Config {
            storage: StorageConfig {
                http_dir: temp_dir.path().join("uploads"),
                peer_dir: temp_dir.path().join("torrents"),
                snapshot_path: temp_dir.path().join("data").join("downloads.json"),
                ..Default::default()
            },
            orchestrator: OrchestratorConfig {
                retry_delay_ms: 5,
                max_retries: test_config.max_retries,
                ..Default::default()
            },
            torrent: TorrentConfig {
                enabled: test_config.enable_peer,
                poll_interval_ms: 10,
                ..Default::default()
            },
            ..Default::default()
        };

        let storage = StorageLayout::new(&config.storage);
        storage.ensure_dirs().expect("Failed to create storage dirs");

        // Create transports
        let http = Arc::new(ScriptedBackend::new("http").with_storage(storage.clone()));
        let torrent_client = Arc::new(MockTorrentClient::new());
        let torrent = test_config.enable_peer.then(|| {
            Arc::new(TorrentBackend::new(
                torrent_client.clone(),
                storage.clone(),
                &config.torrent,
            ))
        });

        let registry = Arc::new(JobRegistry::new(config.storage.snapshot_path.clone()));
        let orchestrator = DownloadOrchestrator::new(
            config.orchestrator.clone(),
            OrchestratorDeps {
                registry,
                storage: storage.clone(),
                mirror: MirrorResolver::disabled(),
                probe: None,
                filename_prefix: config.storage.filename_prefix.clone(),
                http: http.clone(),
                peer: torrent
                    .clone()
                    .map(|backend| backend as Arc<dyn nexusdrop_core::DownloadBackend>),
            },
        );
        orchestrator.start();

        // Create app state with mocks
        let state = Arc::new(AppState::new(config, orchestrator.clone(), torrent));

        // Create router
        let router = nexusdrop_server::api::create_router(state);

        Self {
            router,
            orchestrator,
            http,
            torrent_client,
            storage,
            temp_dir,
        }
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    /// Send a POST request with JSON body.
    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    /// Send a POST request without a body.
    pub async fn post_empty(&self, path: &str) -> TestResponse {
        self.request("POST", path, None).await
    }

    /// Send a DELETE request without a body.
    pub async fn delete(&self, path: &str) -> TestResponse {
        self.request("DELETE", path, None).await
    }

    /// Send a DELETE request with JSON body.
    pub async fn delete_with_body(&self, path: &str, body: Value) -> TestResponse {
        self.request("DELETE", path, Some(body)).await
    }

    /// Upload a single multipart field named `field`.
    pub async fn post_multipart(
        &self,
        path: &str,
        field: &str,
        filename: &str,
        data: &[u8],
    ) -> TestResponse {
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{}\r\n", MULTIPART_BOUNDARY).as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                field, filename
            )
            .as_bytes(),
        );
        body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{}--\r\n", MULTIPART_BOUNDARY).as_bytes());

        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header(
                "Content-Type",
                format!("multipart/form-data; boundary={}", MULTIPART_BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap();

        self.send(request).await
    }

    /// Wait for a job to reach a specific state.
    pub async fn wait_for_state(&self, id: &str, state: JobState) {
        let start = std::time::Instant::now();
        loop {
            if let Some(job) = self.orchestrator.registry().get(id) {
                if job.state == state {
                    return;
                }
            }
            if start.elapsed() > Duration::from_secs(2) {
                panic!(
                    "Timeout waiting for {:?}, current job: {:?}",
                    state,
                    self.orchestrator.registry().get(id)
                );
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Send a request to the test server.
    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        let request = request_builder.body(body).unwrap();
        self.send(request).await
    }

    async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let text = String::from_utf8_lossy(&body_bytes).to_string();
        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body, text }
    }
}

/// Configuration for test fixture.
#[derive(Debug, Clone)]
pub struct TestConfig {
    /// Wire up the peer transport
    pub enable_peer: bool,
    /// Automatic retry budget
    pub max_retries: u32,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            enable_peer: true,
            max_retries: 3,
        }
    }
}

#[allow(dead_code)]
impl TestConfig {
    /// Create config without the peer transport.
    pub fn without_peer() -> Self {
        Self {
            enable_peer: false,
            ..Default::default()
        }
    }
}

/// Helper to assert a response has expected status.
#[macro_export]
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status, $response.status, $response.text
        );
    };
}

/// Helper to assert a JSON path equals expected value.
#[macro_export]
macro_rules! assert_json_path {
    ($json:expr, $path:expr, $expected:expr) => {
        let actual = &$json[$path];
        assert_eq!(
            actual, &$expected,
            "Path '{}' expected {:?}, got {:?}",
            $path, $expected, actual
        );
    };
}
