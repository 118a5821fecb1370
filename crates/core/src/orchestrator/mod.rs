//! Download orchestrator.
//!
//! The orchestrator drives jobs through the state machine:
//! - **Create**: validate input, pick the transport, insert a PENDING job
//! - **Attempt**: run the matching backend, applying progress as it arrives
//! - **Retry**: retryable failures re-launch after a delay until the budget runs out

mod config;
mod retry_queue;
mod runner;
mod types;

pub use config::OrchestratorConfig;
pub use retry_queue::RetryQueue;
pub use runner::{DownloadOrchestrator, OrchestratorDeps};
pub use types::{
    CreateDownload, CreatedDownload, OrchestratorError, OrchestratorStatus, RetryTrigger,
};
