//! Human filename detection from response metadata.

use std::path::Path;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex_lite::Regex;
use tracing::{debug, warn};

use crate::config::HttpConfig;

const FALLBACK_NAME: &str = "download";

static FILENAME_EXT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)filename\*\s*=\s*"?([^;"\r\n]+)"?"#).unwrap());

static FILENAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)filename\s*=\s*(?:"([^"]*)"|'([^']*)'|([^;\r\n]*))"#).unwrap()
});

/// Result of a metadata probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub filename: String,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
}

/// Extension (with leading dot) for a MIME type, ignoring parameters.
pub fn extension_for_mime(content_type: &str) -> Option<&'static str> {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    let ext = match mime.as_str() {
        "application/pdf" => ".pdf",
        "application/zip" => ".zip",
        "application/x-rar-compressed" => ".rar",
        "application/x-7z-compressed" => ".7z",
        "video/mp4" => ".mp4",
        "video/webm" => ".webm",
        "audio/mpeg" => ".mp3",
        "audio/wav" => ".wav",
        "image/jpeg" => ".jpg",
        "image/png" => ".png",
        "image/gif" => ".gif",
        "application/msword" => ".doc",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => ".docx",
        "text/plain" => ".txt",
        _ => return None,
    };
    Some(ext)
}

/// Filename from a `Content-Disposition` value.
///
/// `filename*=` (RFC 5987) wins over `filename=`.
pub fn parse_content_disposition(value: &str) -> Option<String> {
    if let Some(caps) = FILENAME_EXT_RE.captures(value) {
        let raw = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        let encoded = raw.split_once("''").map_or(raw, |(_, name)| name);
        if let Ok(decoded) = urlencoding::decode(encoded) {
            let decoded = decoded.trim();
            if !decoded.is_empty() {
                return Some(decoded.to_string());
            }
        }
    }

    let caps = FILENAME_RE.captures(value)?;
    let name = caps
        .get(1)
        .or_else(|| caps.get(2))
        .or_else(|| caps.get(3))
        .map(|m| m.as_str().trim())?;
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Last non-empty path segment of a URL, percent-decoded.
fn basename_from_url(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.rev().find(|s| !s.is_empty())?;
    let decoded = urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| segment.to_string());
    Some(decoded)
}

fn has_extension(name: &str) -> bool {
    Path::new(name).extension().is_some()
}

/// Pick a filename: disposition header, then URL basename, then
/// `"download"`. A MIME-derived extension is appended when the pick has none.
pub fn choose_filename(url: &str, disposition: Option<&str>, content_type: Option<&str>) -> String {
    let mut name = disposition
        .and_then(parse_content_disposition)
        .or_else(|| basename_from_url(url))
        .unwrap_or_else(|| FALLBACK_NAME.to_string());

    if !has_extension(&name) {
        if let Some(ext) = content_type.and_then(extension_for_mime) {
            name.push_str(ext);
        }
    }
    name
}

/// Issues metadata-only (HEAD) requests to learn a source's filename.
#[derive(Debug, Clone)]
pub struct FilenameProbe {
    client: reqwest::Client,
}

impl FilenameProbe {
    pub fn new(config: &HttpConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.probe_timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self { client })
    }

    /// Probe `url` for name, type and size. Never fails: on any error the
    /// URL basename (or `"download"`) is used.
    pub async fn detect_filename(&self, url: &str) -> FileInfo {
        let response = match self.client.head(url).send().await {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                warn!(url = %url, status = %response.status(), "Filename probe rejected");
                return Self::fallback(url);
            }
            Err(e) => {
                warn!(url = %url, error = %e, "Filename probe failed");
                return Self::fallback(url);
            }
        };

        let headers = response.headers();
        let header = |name: reqwest::header::HeaderName| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let disposition = header(reqwest::header::CONTENT_DISPOSITION);
        let content_type = header(reqwest::header::CONTENT_TYPE);
        let content_length =
            header(reqwest::header::CONTENT_LENGTH).and_then(|v| v.trim().parse().ok());

        let filename = choose_filename(url, disposition.as_deref(), content_type.as_deref());
        debug!(url = %url, filename = %filename, "Detected filename");

        FileInfo {
            filename,
            content_type,
            content_length,
        }
    }

    fn fallback(url: &str) -> FileInfo {
        FileInfo {
            filename: basename_from_url(url).unwrap_or_else(|| FALLBACK_NAME.to_string()),
            content_type: None,
            content_length: None,
        }
    }
}
