//! Background maintenance: stuck detection, expiry, orphan reconciliation
//! and periodic snapshots.

mod config;
mod sweeper;

pub use config::SweeperConfig;
pub use sweeper::{LifecycleSweeper, ReconcileReport};
