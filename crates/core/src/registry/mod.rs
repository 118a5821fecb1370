//! In-memory job registry with JSON snapshot persistence.

mod snapshot;
mod store;

pub use snapshot::{read_snapshot, write_snapshot};
pub use store::JobRegistry;

use thiserror::Error;

/// Errors from registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Job already exists: {0}")]
    DuplicateId(String),

    #[error("Snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
