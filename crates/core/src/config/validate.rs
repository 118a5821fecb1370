use super::{types::Config, ConfigError};

/// Validate configuration.
///
/// Rejects values that would make the service misbehave silently: a zero
/// port, zero retry budget, zero timers, shared storage roots, a snapshot
/// stored inside a storage root, and an unparseable mirror URL.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    if config.storage.http_dir == config.storage.peer_dir {
        return Err(ConfigError::ValidationError(
            "storage.http_dir and storage.peer_dir must differ".to_string(),
        ));
    }

    // Reconciliation deletes unclaimed files under both roots.
    let snapshot = &config.storage.snapshot_path;
    if snapshot.starts_with(&config.storage.http_dir)
        || snapshot.starts_with(&config.storage.peer_dir)
    {
        return Err(ConfigError::ValidationError(format!(
            "storage.snapshot_path must be outside the artifact directories: {}",
            snapshot.display()
        )));
    }

    for (name, prefix) in [
        ("storage.http_url_prefix", &config.storage.http_url_prefix),
        ("storage.peer_url_prefix", &config.storage.peer_url_prefix),
    ] {
        if !prefix.starts_with('/') || prefix.trim_end_matches('/').is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "{} must be a non-root path starting with '/': {}",
                name, prefix
            )));
        }
    }
    if config.storage.http_url_prefix == config.storage.peer_url_prefix {
        return Err(ConfigError::ValidationError(
            "storage.http_url_prefix and storage.peer_url_prefix must differ".to_string(),
        ));
    }

    let orch = &config.orchestrator;
    if orch.max_retries == 0 {
        return Err(ConfigError::ValidationError(
            "orchestrator.max_retries must be at least 1".to_string(),
        ));
    }
    if orch.stuck_timeout_ms == 0 {
        return Err(ConfigError::ValidationError(
            "orchestrator.stuck_timeout_ms cannot be 0".to_string(),
        ));
    }
    if !(orch.default_ttl_hours.is_finite() && orch.default_ttl_hours > 0.0) {
        return Err(ConfigError::ValidationError(
            "orchestrator.default_ttl_hours must be positive".to_string(),
        ));
    }

    let sweeper = &config.sweeper;
    for (name, value) in [
        ("sweeper.stuck_check_interval_secs", sweeper.stuck_check_interval_secs),
        ("sweeper.expiry_interval_secs", sweeper.expiry_interval_secs),
        ("sweeper.reconcile_interval_secs", sweeper.reconcile_interval_secs),
        ("sweeper.snapshot_interval_secs", sweeper.snapshot_interval_secs),
    ] {
        if value == 0 {
            return Err(ConfigError::ValidationError(format!("{} cannot be 0", name)));
        }
    }

    if config.torrent.poll_interval_ms == 0 {
        return Err(ConfigError::ValidationError(
            "torrent.poll_interval_ms cannot be 0".to_string(),
        ));
    }

    if config.mirror.enabled && url::Url::parse(&config.mirror.base_url).is_err() {
        return Err(ConfigError::ValidationError(format!(
            "mirror.base_url is not a valid URL: {}",
            config.mirror.base_url
        )));
    }

    Ok(())
}
