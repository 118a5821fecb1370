//! Sweeper configuration.

use serde::{Deserialize, Serialize};

/// Intervals of the background maintenance loops, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweeperConfig {
    #[serde(default = "default_stuck_check_interval")]
    pub stuck_check_interval_secs: u64,

    #[serde(default = "default_expiry_interval")]
    pub expiry_interval_secs: u64,

    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,

    /// How often the registry snapshot is written.
    #[serde(default = "default_snapshot_interval")]
    pub snapshot_interval_secs: u64,
}

fn default_stuck_check_interval() -> u64 {
    60
}

fn default_expiry_interval() -> u64 {
    24 * 60 * 60
}

fn default_reconcile_interval() -> u64 {
    60 * 60
}

fn default_snapshot_interval() -> u64 {
    5
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            stuck_check_interval_secs: default_stuck_check_interval(),
            expiry_interval_secs: default_expiry_interval(),
            reconcile_interval_secs: default_reconcile_interval(),
            snapshot_interval_secs: default_snapshot_interval(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SweeperConfig::default();
        assert_eq!(config.stuck_check_interval_secs, 60);
        assert_eq!(config.expiry_interval_secs, 86_400);
        assert_eq!(config.reconcile_interval_secs, 3_600);
        assert_eq!(config.snapshot_interval_secs, 5);
    }

    #[test]
    fn test_partial_toml() {
        let config: SweeperConfig = toml::from_str("snapshot_interval_secs = 30").unwrap();
        assert_eq!(config.snapshot_interval_secs, 30);
        assert_eq!(config.stuck_check_interval_secs, 60);
    }
}
