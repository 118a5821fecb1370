//! HTTP transport tests against a local mock server.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use httpmock::prelude::*;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_test::assert_ok;
use tokio_util::sync::CancellationToken;

use nexusdrop_core::{
    testing::fixtures, CreateDownload, DownloadBackend, DownloadOrchestrator, FetchError,
    HttpBackend, HttpConfig, Job, JobRegistry, JobState, MirrorResolver, OrchestratorConfig,
    OrchestratorDeps, ProgressCallback, ProgressUpdate, StorageConfig, StorageLayout,
};

struct Setup {
    _dir: TempDir,
    storage: StorageLayout,
    backend: HttpBackend,
}

fn setup() -> Setup {
    let dir = TempDir::new().unwrap();
    let storage = StorageLayout::new(&StorageConfig {
        http_dir: dir.path().join("uploads"),
        peer_dir: dir.path().join("torrents"),
        ..Default::default()
    });
    storage.ensure_dirs().unwrap();
    let backend = HttpBackend::new(
        &HttpConfig::default(),
        MirrorResolver::disabled(),
        storage.clone(),
    )
    .unwrap();
    Setup {
        _dir: dir,
        storage,
        backend,
    }
}

fn body(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Progress callback that remembers every update.
fn recorder() -> (ProgressCallback, Arc<Mutex<Vec<ProgressUpdate>>>) {
    let updates = Arc::new(Mutex::new(Vec::new()));
    let sink = updates.clone();
    let callback: ProgressCallback = Arc::new(move |update| sink.lock().unwrap().push(update));
    (callback, updates)
}

fn job_for(server: &MockServer, path: &str) -> Job {
    fixtures::http_job("job1", &server.url(path))
}

#[tokio::test]
async fn test_fresh_download() {
    let s = setup();
    let server = MockServer::start_async().await;
    let content = body(1000);
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/file.bin");
            then.status(200).body(&content);
        })
        .await;

    let job = job_for(&server, "/file.bin");
    let (callback, updates) = recorder();
    assert_ok!(s.backend.start_download(&job, callback, CancellationToken::new()).await);

    mock.assert_async().await;
    assert_eq!(std::fs::read(s.storage.artifact_path(&job)).unwrap(), content);

    let updates = updates.lock().unwrap();
    let last = updates.last().unwrap();
    assert_eq!(last.progress_percent, 100.0);
    assert_eq!(last.downloaded_bytes, 1000);
    assert_eq!(last.total_bytes, Some(1000));
}

#[tokio::test]
async fn test_resume_sends_range_and_appends() {
    let s = setup();
    let server = MockServer::start_async().await;
    let content = body(1000);
    let mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/file.bin")
                .header("Range", "bytes=400-");
            then.status(206)
                .header("Content-Range", "bytes 400-999/1000")
                .body(&content[400..]);
        })
        .await;

    let job = job_for(&server, "/file.bin");
    std::fs::write(s.storage.artifact_path(&job), &content[..400]).unwrap();

    let (callback, updates) = recorder();
    assert_ok!(s.backend.start_download(&job, callback, CancellationToken::new()).await);

    mock.assert_async().await;
    let on_disk = std::fs::read(s.storage.artifact_path(&job)).unwrap();
    assert_eq!(on_disk.len(), 1000);
    assert_eq!(on_disk, content);
    assert_eq!(updates.lock().unwrap().last().unwrap().downloaded_bytes, 1000);
}

#[tokio::test]
async fn test_full_response_to_range_request_restarts_file() {
    let s = setup();
    let server = MockServer::start_async().await;
    let content = body(300);
    server
        .mock_async(|when, then| {
            when.method(GET).path("/file.bin");
            then.status(200).body(&content);
        })
        .await;

    let job = job_for(&server, "/file.bin");
    std::fs::write(s.storage.artifact_path(&job), b"stale partial bytes").unwrap();

    let (callback, _) = recorder();
    assert_ok!(s.backend.start_download(&job, callback, CancellationToken::new()).await);
    assert_eq!(std::fs::read(s.storage.artifact_path(&job)).unwrap(), content);
}

#[tokio::test]
async fn test_error_status_fails() {
    let s = setup();
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/missing.bin");
            then.status(404);
        })
        .await;

    let job = job_for(&server, "/missing.bin");
    let (callback, _) = recorder();
    let result = s.backend.start_download(&job, callback, CancellationToken::new()).await;
    match result {
        Err(e @ FetchError::HttpStatus(404)) => assert!(e.is_retryable()),
        other => panic!("unexpected result: {:?}", other),
    }
}

#[tokio::test]
async fn test_range_not_satisfiable_on_complete_file() {
    let s = setup();
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/done.bin");
            then.status(416).header("Content-Range", "bytes */100");
        })
        .await;

    let job = job_for(&server, "/done.bin");
    std::fs::write(s.storage.artifact_path(&job), body(100)).unwrap();

    let (callback, updates) = recorder();
    assert_ok!(s.backend.start_download(&job, callback, CancellationToken::new()).await);
    assert_eq!(updates.lock().unwrap().last().unwrap().progress_percent, 100.0);
    assert_eq!(std::fs::metadata(s.storage.artifact_path(&job)).unwrap().len(), 100);
}

#[tokio::test]
async fn test_range_not_satisfiable_on_mismatched_file() {
    let s = setup();
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/changed.bin");
            then.status(416).header("Content-Range", "bytes */50");
        })
        .await;

    let job = job_for(&server, "/changed.bin");
    std::fs::write(s.storage.artifact_path(&job), body(100)).unwrap();

    let (callback, _) = recorder();
    let result = s.backend.start_download(&job, callback, CancellationToken::new()).await;
    assert!(matches!(result, Err(FetchError::HttpStatus(416))));
    assert!(!s.storage.artifact_path(&job).exists());
}

#[tokio::test]
async fn test_short_body_is_incomplete() {
    let s = setup();
    let server = MockServer::start_async().await;
    let content = body(100);
    server
        .mock_async(|when, then| {
            when.method(GET).path("/short.bin");
            then.status(206)
                .header("Content-Range", "bytes 10-19/100")
                .body(&content[10..20]);
        })
        .await;

    let job = job_for(&server, "/short.bin");
    std::fs::write(s.storage.artifact_path(&job), &content[..10]).unwrap();

    let (callback, _) = recorder();
    let result = s.backend.start_download(&job, callback, CancellationToken::new()).await;
    match result {
        Err(FetchError::Incomplete { expected, received }) => {
            assert_eq!(expected, 100);
            assert_eq!(received, 20);
        }
        other => panic!("unexpected result: {:?}", other),
    }
}

#[tokio::test]
async fn test_recorded_effective_url_is_fetched() {
    let s = setup();
    let server = MockServer::start_async().await;
    let content = body(64);
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/mirrored.bin");
            then.status(200).body(&content);
        })
        .await;

    let mut job = job_for(&server, "/mirrored.bin");
    job.source_url = "http://origin.invalid/mirrored.bin".to_string();

    let (callback, _) = recorder();
    assert_ok!(s.backend.start_download(&job, callback, CancellationToken::new()).await);
    mock.assert_async().await;
    assert_eq!(std::fs::read(s.storage.artifact_path(&job)).unwrap(), content);
}

const SLOW_CHUNK: usize = 4096;

/// Serve `content` over raw HTTP/1.1 with `Range` support, pausing between
/// chunks so transfers stay in flight long enough to be interrupted.
async fn slow_server(content: Arc<Vec<u8>>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(serve_slowly(socket, content.clone()));
        }
    });
    format!("http://{}/slow.bin", addr)
}

async fn serve_slowly(mut socket: TcpStream, content: Arc<Vec<u8>>) {
    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => request.extend_from_slice(&buf[..n]),
        }
    }

    let request = String::from_utf8_lossy(&request).to_lowercase();
    let start = request
        .lines()
        .find_map(|line| line.strip_prefix("range: bytes="))
        .and_then(|range| range.trim().trim_end_matches('-').parse::<usize>().ok())
        .unwrap_or(0);
    let len = content.len();

    let head = if start >= len {
        format!(
            "HTTP/1.1 416 Range Not Satisfiable\r\nContent-Range: bytes */{}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            len
        )
    } else if start > 0 {
        format!(
            "HTTP/1.1 206 Partial Content\r\nContent-Length: {}\r\nContent-Range: bytes {}-{}/{}\r\nConnection: close\r\n\r\n",
            len - start,
            start,
            len - 1,
            len
        )
    } else {
        format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            len
        )
    };
    if socket.write_all(head.as_bytes()).await.is_err() || start >= len {
        return;
    }
    for chunk in content[start..].chunks(SLOW_CHUNK) {
        if socket.write_all(chunk).await.is_err() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

#[tokio::test]
async fn test_cancelled_fetch_resumes_cleanly() {
    let s = setup();
    let content = Arc::new(body(64 * SLOW_CHUNK));
    let url = slow_server(content.clone()).await;
    let job = fixtures::http_job("job1", &url);
    let path = s.storage.artifact_path(&job);

    let backend = Arc::new(s.backend);
    let token = CancellationToken::new();
    let task = {
        let backend = backend.clone();
        let job = job.clone();
        let token = token.clone();
        tokio::spawn(async move {
            let (callback, _) = recorder();
            backend.start_download(&job, callback, token).await
        })
    };

    for _ in 0..200 {
        if std::fs::metadata(&path).map(|m| m.len() > 0).unwrap_or(false) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    token.cancel();
    let result = task.await.unwrap();
    assert!(matches!(result, Err(FetchError::Cancelled)));

    let partial = std::fs::read(&path).unwrap();
    assert!(partial.len() < content.len());
    assert_eq!(partial, content[..partial.len()]);

    let (callback, _) = recorder();
    assert_ok!(backend.start_download(&job, callback, CancellationToken::new()).await);
    assert_eq!(std::fs::read(&path).unwrap(), *content);
}

#[tokio::test]
async fn test_repeated_stuck_restarts_keep_artifact_intact() {
    let s = setup();
    let content = Arc::new(body(96 * SLOW_CHUNK));
    let url = slow_server(content.clone()).await;

    let orchestrator = DownloadOrchestrator::new(
        OrchestratorConfig {
            max_retries: 1_000,
            retry_delay_ms: 5,
            stuck_timeout_ms: 1,
            ..Default::default()
        },
        OrchestratorDeps {
            registry: Arc::new(JobRegistry::new(s._dir.path().join("downloads.json"))),
            storage: s.storage.clone(),
            mirror: MirrorResolver::disabled(),
            probe: None,
            filename_prefix: "NexusDrop".to_string(),
            http: Arc::new(s.backend),
            peer: None,
        },
    );

    let created = orchestrator
        .create_download(CreateDownload {
            url: url.clone(),
            ttl_hours: Some(1.0),
        })
        .await
        .unwrap();

    let mut restarts = 0;
    for _ in 0..25 {
        tokio::time::sleep(Duration::from_millis(8)).await;
        match orchestrator.registry().get(&created.id) {
            Some(job) if job.state == JobState::Downloading => {
                restarts += orchestrator
                    .check_stuck(Utc::now() + chrono::Duration::hours(1))
                    .await;
            }
            _ => break,
        }
    }
    assert!(restarts > 0);

    let mut finished = None;
    for _ in 0..500 {
        let job = orchestrator.registry().get(&created.id).unwrap();
        if job.state == JobState::Completed {
            finished = Some(job);
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let job = finished.expect("download never completed");

    let on_disk = std::fs::read(s.storage.artifact_path(&job)).unwrap();
    assert_eq!(on_disk.len(), content.len());
    assert!(on_disk == *content, "artifact bytes differ from the source");
}
