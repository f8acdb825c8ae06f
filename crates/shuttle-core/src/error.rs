use std::time::Duration;

use thiserror::Error;

use crate::domain::{ItemId, WorkerId};

/// Error type returned by caller-supplied work items, handlers and sources.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors returned to callers of [`Pool::submit`](crate::pool::Pool::submit).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    /// Shutdown has begun; the item was not accepted.
    #[error("pool is closed")]
    Closed,

    /// Only from `try_submit`: the intake queue has no free slot right now.
    #[error("intake queue is full")]
    Full,
}

/// Raised by [`PoolBuilder::build`](crate::pool::PoolBuilder::build) when the
/// requested pool cannot be started.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("a pool needs at least one worker")]
    NoWorkers,

    #[error("no tokio runtime is available to spawn workers on")]
    NoRuntime,
}

/// A failure that happened inside the pool but never crossed its boundary.
///
/// These are handed to the pool's error callback; the worker that produced
/// them keeps running.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkerError {
    #[error("{worker} failed {item}: {message}")]
    Failed {
        worker: WorkerId,
        item: ItemId,
        message: String,
    },

    #[error("{worker} caught a panic in {item}: {message}")]
    Panicked {
        worker: WorkerId,
        item: ItemId,
        message: String,
    },

    /// An accepted item was dropped by a stop-immediately shutdown.
    #[error("{item} discarded by shutdown")]
    Discarded { item: ItemId },
}

impl WorkerError {
    pub fn item(&self) -> ItemId {
        match self {
            WorkerError::Failed { item, .. }
            | WorkerError::Panicked { item, .. }
            | WorkerError::Discarded { item } => *item,
        }
    }
}

/// One source's failure inside a race.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptFailure {
    pub source: usize,
    pub name: String,
    pub message: String,
}

impl std::fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "source #{} ({}): {}", self.source, self.name, self.message)
    }
}

/// Errors returned by [`Dispatcher::dispatch`](crate::race::Dispatcher::dispatch).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("no source answered within {after:?}")]
    Timeout { after: Duration },

    #[error("all {} sources failed", failures.len())]
    AllFailed { failures: Vec<AttemptFailure> },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {name}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
