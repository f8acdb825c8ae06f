//! Where item failures end up: counters, logs and the caller's callback.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::domain::WorkerState;
use crate::error::WorkerError;
use crate::observability::{Counters, PoolStats};

/// Callback receiving every [`WorkerError`] the pool produces.
pub type ErrorCallback = Arc<dyn Fn(WorkerError) + Send + Sync>;

pub(crate) struct Reporter {
    counters: Counters,
    on_error: Option<ErrorCallback>,
}

impl Reporter {
    pub fn new(workers: usize, on_error: Option<ErrorCallback>) -> Self {
        Self {
            counters: Counters::new(workers),
            on_error,
        }
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn stats(&self) -> PoolStats {
        self.counters.snapshot()
    }

    pub fn set_worker(&self, index: usize, state: WorkerState) {
        self.counters.set_worker(index, state);
    }

    /// Count, log and forward one failure.
    ///
    /// A panicking callback is logged and swallowed; it must not take the
    /// reporting worker down with it.
    pub fn report(&self, error: WorkerError) {
        match &error {
            WorkerError::Failed {
                worker,
                item,
                message,
            } => {
                Counters::bump(&self.counters.failed);
                tracing::warn!(%worker, %item, %message, "work item failed");
            }
            WorkerError::Panicked {
                worker,
                item,
                message,
            } => {
                Counters::bump(&self.counters.panicked);
                tracing::error!(%worker, %item, %message, "work item panicked");
            }
            WorkerError::Discarded { item } => {
                Counters::bump(&self.counters.discarded);
                tracing::warn!(%item, "queued work item discarded by shutdown");
            }
        }

        if let Some(on_error) = &self.on_error
            && std::panic::catch_unwind(AssertUnwindSafe(|| on_error(error))).is_err()
        {
            tracing::error!("pool error callback panicked");
        }
    }
}
