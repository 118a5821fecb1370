//! Delayed retry timers keyed by job id.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;

#[derive(Debug)]
struct PendingRetry {
    token: u64,
    handle: JoinHandle<()>,
}

type Timers = Arc<Mutex<HashMap<String, PendingRetry>>>;

fn lock(timers: &Timers) -> MutexGuard<'_, HashMap<String, PendingRetry>> {
    timers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// At most one pending retry per job. Cancelling a job's timer guarantees
/// its retry never fires.
#[derive(Debug, Default)]
pub struct RetryQueue {
    timers: Timers,
    next_token: AtomicU64,
}

impl RetryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `fire` after `delay`, replacing any timer already pending for
    /// `job_id`.
    pub fn schedule<F>(&self, job_id: &str, delay: Duration, fire: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let timers = Arc::clone(&self.timers);
        let id = job_id.to_string();

        let mut pending = lock(&self.timers);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let still_scheduled = {
                let mut timers = lock(&timers);
                match timers.get(&id) {
                    Some(entry) if entry.token == token => {
                        timers.remove(&id);
                        true
                    }
                    _ => false,
                }
            };
            if still_scheduled {
                fire.await;
            }
        });

        if let Some(previous) = pending.insert(job_id.to_string(), PendingRetry { token, handle }) {
            previous.handle.abort();
        }
    }

    /// Cancel the pending retry for `job_id`. Returns whether one existed.
    pub fn cancel(&self, job_id: &str) -> bool {
        match lock(&self.timers).remove(job_id) {
            Some(entry) => {
                entry.handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        for (_, entry) in lock(&self.timers).drain() {
            entry.handle.abort();
        }
    }

    pub fn is_pending(&self, job_id: &str) -> bool {
        lock(&self.timers).contains_key(job_id)
    }

    pub fn len(&self) -> usize {
        lock(&self.timers).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
