use tracing::warn;
use url::Url;

use crate::config::MirrorConfig;

/// Rewrites source URLs onto the download mirror.
#[derive(Debug, Clone)]
pub struct MirrorResolver {
    base_url: Option<String>,
    host: Option<String>,
}

impl MirrorResolver {
    pub fn new(config: &MirrorConfig) -> Self {
        if !config.enabled {
            return Self::disabled();
        }
        let base_url = config.base_url.trim_end_matches('/').to_string();
        let host = Url::parse(&base_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string));
        Self {
            base_url: Some(base_url),
            host,
        }
    }

    /// A resolver that never rewrites.
    pub fn disabled() -> Self {
        Self {
            base_url: None,
            host: None,
        }
    }

    /// `scheme://mirror/<host><path><query>`, or the source unchanged when
    /// it already points at the mirror, the mirror is disabled, or the
    /// source does not parse.
    pub fn resolve_fetch_url(&self, source_url: &str) -> String {
        let (Some(base_url), Some(host)) = (&self.base_url, &self.host) else {
            return source_url.to_string();
        };

        if source_url.contains(host.as_str()) {
            return source_url.to_string();
        }

        let parsed = match Url::parse(source_url) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(url = %source_url, error = %e, "Cannot parse URL for mirror rewrite");
                return source_url.to_string();
            }
        };

        let Some(source_host) = parsed.host_str() else {
            return source_url.to_string();
        };
        if !matches!(parsed.scheme(), "http" | "https") {
            return source_url.to_string();
        }

        let authority = match parsed.port() {
            Some(port) => format!("{}:{}", source_host, port),
            None => source_host.to_string(),
        };
        let query = parsed.query().map(|q| format!("?{}", q)).unwrap_or_default();

        format!("{}/{}{}{}", base_url, authority, parsed.path(), query)
    }
}
