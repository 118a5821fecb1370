//! Direct HTTP transport with range resume.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderName, CONTENT_LENGTH, CONTENT_RANGE, RANGE};
use reqwest::StatusCode;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{DownloadBackend, FetchError, ProgressCallback};
use crate::config::HttpConfig;
use crate::job::{Job, ProgressUpdate};
use crate::resolver::MirrorResolver;
use crate::storage::StorageLayout;

/// Minimum spacing between progress samples.
const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Streams HTTP sources into the HTTP storage root.
pub struct HttpBackend {
    client: reqwest::Client,
    mirror: MirrorResolver,
    storage: StorageLayout,
    chunk_timeout: Duration,
}

impl HttpBackend {
    pub fn new(
        config: &HttpConfig,
        mirror: MirrorResolver,
        storage: StorageLayout,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self {
            client,
            mirror,
            storage,
            chunk_timeout: Duration::from_secs(config.chunk_timeout_secs),
        })
    }
}

/// Total size from a `Content-Range` value (`bytes 0-99/200` or `bytes */200`).
fn content_range_total(value: &str) -> Option<u64> {
    value.rsplit_once('/')?.1.trim().parse().ok()
}

fn percent(done: u64, total: Option<u64>) -> f64 {
    match total {
        Some(total) if total > 0 => (done as f64 * 100.0 / total as f64).min(100.0),
        _ => 0.0,
    }
}

#[async_trait]
impl DownloadBackend for HttpBackend {
    fn name(&self) -> &str {
        "http"
    }

    async fn start_download(
        &self,
        job: &Job,
        on_progress: ProgressCallback,
        cancel: CancellationToken,
    ) -> Result<(), FetchError> {
        let path = self.storage.artifact_path(job);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let resume_from = match fs::metadata(&path).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };

        let url = job
            .effective_url
            .clone()
            .unwrap_or_else(|| self.mirror.resolve_fetch_url(&job.source_url));
        info!(job_id = %job.id, url = %url, resume_from, "Starting HTTP fetch");

        let mut request = self.client.get(&url);
        if resume_from > 0 {
            request = request.header(RANGE, format!("bytes={}-", resume_from));
        }
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            response = request.send() => response?,
        };
        let status = response.status();

        let header = |name: HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };

        if status == StatusCode::RANGE_NOT_SATISFIABLE && resume_from > 0 {
            let remote_total = header(CONTENT_RANGE).as_deref().and_then(content_range_total);
            if remote_total == Some(resume_from) {
                debug!(job_id = %job.id, "Local file already complete");
                on_progress(ProgressUpdate {
                    downloaded_bytes: resume_from,
                    total_bytes: Some(resume_from),
                    progress_percent: 100.0,
                    speed_bytes_per_sec: 0,
                    telemetry: None,
                });
                return Ok(());
            }
            // Local file does not match the remote one; start over next time.
            warn!(job_id = %job.id, ?remote_total, resume_from, "Discarding unusable partial file");
            fs::remove_file(&path).await?;
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        let content_length: Option<u64> = header(CONTENT_LENGTH).and_then(|v| v.trim().parse().ok());
        let appending = resume_from > 0 && status == StatusCode::PARTIAL_CONTENT;
        let offset = if appending { resume_from } else { 0 };
        if resume_from > 0 && !appending {
            debug!(job_id = %job.id, status = %status, "Range ignored by server, restarting from zero");
        }

        let total = if appending {
            header(CONTENT_RANGE)
                .as_deref()
                .and_then(content_range_total)
                .or(content_length.map(|len| len + offset))
        } else {
            content_length
        };

        let mut file = if appending {
            OpenOptions::new().append(true).open(&path).await?
        } else {
            fs::File::create(&path).await?
        };

        let mut stream = response.bytes_stream();
        let mut received = offset;
        let mut last_sample = Instant::now();
        let mut last_sample_bytes = received;

        loop {
            // Writes are never raced against cancellation so the file only
            // grows by whole chunks.
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    file.flush().await?;
                    debug!(job_id = %job.id, bytes = received, "HTTP fetch cancelled");
                    return Err(FetchError::Cancelled);
                }
                next = tokio::time::timeout(self.chunk_timeout, stream.next()) => next,
            };
            let next = next.map_err(|_| {
                FetchError::Timeout(format!("no data for {}s", self.chunk_timeout.as_secs()))
            })?;
            let Some(chunk) = next else { break };
            let chunk = chunk?;

            file.write_all(&chunk).await?;
            received += chunk.len() as u64;

            let elapsed = last_sample.elapsed();
            if elapsed >= SAMPLE_INTERVAL {
                let speed = ((received - last_sample_bytes) as f64 / elapsed.as_secs_f64()) as u64;
                on_progress(ProgressUpdate {
                    downloaded_bytes: received,
                    total_bytes: total,
                    progress_percent: percent(received, total),
                    speed_bytes_per_sec: speed,
                    telemetry: None,
                });
                last_sample = Instant::now();
                last_sample_bytes = received;
            }
        }

        file.flush().await?;
        drop(file);

        if let Some(expected) = total {
            if received < expected {
                return Err(FetchError::Incomplete { expected, received });
            }
        }

        on_progress(ProgressUpdate {
            downloaded_bytes: received,
            total_bytes: total.or(Some(received)),
            progress_percent: 100.0,
            speed_bytes_per_sec: 0,
            telemetry: None,
        });

        info!(job_id = %job.id, bytes = received, "HTTP fetch finished");
        Ok(())
    }
}
