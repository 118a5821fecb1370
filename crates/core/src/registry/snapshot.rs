//! Snapshot file: one JSON object mapping job id to job record.

use std::collections::HashMap;
use std::path::Path;

use super::RegistryError;
use crate::job::Job;

/// Read a snapshot. A missing file is an empty registry.
pub fn read_snapshot(path: &Path) -> Result<HashMap<String, Job>, RegistryError> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(e) => return Err(e.into()),
    };
    if data.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(HashMap::new());
    }
    Ok(serde_json::from_slice(&data)?)
}

/// Overwrite the snapshot atomically (write to a sibling temp file, then
/// rename over the target).
pub fn write_snapshot(path: &Path, jobs: &HashMap<String, Job>) -> Result<(), RegistryError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let data = serde_json::to_vec_pretty(jobs)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp);

    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::NewJob;
    use chrono::{Duration, Utc};
    use tempfile::TempDir;

    fn job(id: &str) -> Job {
        let now = Utc::now();
        Job::pending(NewJob {
            id: id.to_string(),
            owner_token: format!("token-{}", id),
            source_url: "https://example.com/a.bin".to_string(),
            effective_url: None,
            filename: format!("NexusDrop_AAAA-{}.bin", id),
            original_filename: "a.bin".to_string(),
            is_peer_transport: false,
            resource_id: None,
            download_url: String::new(),
            created_at: now,
            expires_at: now + Duration::hours(1),
        })
    }

    #[test]
    fn test_read_missing_snapshot_is_empty() {
        let dir = TempDir::new().unwrap();
        let jobs = read_snapshot(&dir.path().join("none.json")).unwrap();
        assert!(jobs.is_empty());
    }

    #[test]
    fn test_write_creates_parent_and_reads_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data").join("downloads.json");

        let mut jobs = HashMap::new();
        jobs.insert("a".to_string(), job("a"));
        jobs.insert("b".to_string(), job("b"));
        write_snapshot(&path, &jobs).unwrap();

        assert!(path.exists());
        assert!(!dir.path().join("data").join("downloads.json.tmp").exists());

        let loaded = read_snapshot(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded["a"].owner_token, "token-a");
    }

    #[test]
    fn test_read_corrupt_snapshot_errors() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("downloads.json");
        std::fs::write(&path, b"{ not json").unwrap();
        assert!(matches!(
            read_snapshot(&path),
            Err(RegistryError::Serialization(_))
        ));
    }
}
