//! Intake queue: the only path from submitters to workers.
//!
//! Design:
//! - A flume MPMC channel; every worker holds a receiver clone, so whichever
//!   worker is free takes the next item and no item is seen twice.
//! - The single sender sits behind an async `RwLock`. Submissions hold a read
//!   guard while they hand the item over; sealing takes the write guard and
//!   drops the sender. Once sealed, workers see "disconnected" as soon as the
//!   buffer is empty, and nothing can be enqueued again.
//! - Items travel inside an [`Envelope`]. The envelope is armed once the
//!   channel has accepted it; an armed envelope dropped while still holding
//!   its item was never run and reports itself as discarded. A submission
//!   cancelled by its caller drops an unarmed envelope and reports nothing.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use flume::{SendError, TrySendError};
use tokio::sync::RwLock;

use crate::config::QueueCapacity;
use crate::domain::{ItemId, WorkItem};
use crate::error::{PoolError, WorkerError};
use crate::signal::Signal;

use super::report::Reporter;

pub(crate) struct Envelope {
    id: ItemId,
    item: Option<WorkItem>,
    armed: Arc<AtomicBool>,
    reporter: Arc<Reporter>,
}

impl Envelope {
    pub fn new(id: ItemId, item: WorkItem, reporter: Arc<Reporter>) -> Self {
        Self {
            id,
            item: Some(item),
            armed: Arc::new(AtomicBool::new(false)),
            reporter,
        }
    }

    fn arming(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.armed)
    }

    #[cfg(test)]
    pub fn id(&self) -> ItemId {
        self.id
    }

    /// Claim the item for execution.
    pub fn open(mut self) -> Option<(ItemId, WorkItem)> {
        self.item.take().map(|item| (self.id, item))
    }

    /// Drop an envelope that was never accepted, without reporting it.
    fn reject(mut self) {
        self.item.take();
    }
}

impl Drop for Envelope {
    fn drop(&mut self) {
        if self.item.take().is_some() && self.armed.load(Ordering::Acquire) {
            self.reporter
                .report(WorkerError::Discarded { item: self.id });
        }
    }
}

pub(crate) struct Intake {
    gate: RwLock<Option<flume::Sender<Envelope>>>,
}

impl Intake {
    pub fn new(capacity: QueueCapacity) -> (Self, flume::Receiver<Envelope>) {
        let (tx, rx) = match capacity {
            QueueCapacity::Bounded(n) => flume::bounded(n),
            QueueCapacity::Unbounded => flume::unbounded(),
        };
        let intake = Self {
            gate: RwLock::new(Some(tx)),
        };
        (intake, rx)
    }

    /// Hand an envelope to the workers, waiting for room if necessary.
    ///
    /// `shutdown` is checked under the gate, so a submission that starts
    /// after shutdown began is always rejected.
    pub async fn push(&self, envelope: Envelope, shutdown: &Signal) -> Result<(), PoolError> {
        let gate = self.gate.read().await;
        let Some(tx) = gate.as_ref().filter(|_| !shutdown.is_raised()) else {
            envelope.reject();
            return Err(PoolError::Closed);
        };

        let armed = envelope.arming();
        match tx.send_async(envelope).await {
            Ok(()) => {
                armed.store(true, Ordering::Release);
                Ok(())
            }
            // worker が全員いない (stop-immediately で終了済み)
            Err(SendError(envelope)) => {
                envelope.reject();
                Err(PoolError::Closed)
            }
        }
    }

    /// Non-blocking variant of [`push`](Self::push).
    pub fn try_push(&self, envelope: Envelope, shutdown: &Signal) -> Result<(), PoolError> {
        // writer 待ちがある = seal 中
        let Ok(gate) = self.gate.try_read() else {
            envelope.reject();
            return Err(PoolError::Closed);
        };
        let Some(tx) = gate.as_ref().filter(|_| !shutdown.is_raised()) else {
            envelope.reject();
            return Err(PoolError::Closed);
        };

        let armed = envelope.arming();
        match tx.try_send(envelope) {
            Ok(()) => {
                armed.store(true, Ordering::Release);
                Ok(())
            }
            Err(TrySendError::Full(envelope)) => {
                envelope.reject();
                Err(PoolError::Full)
            }
            Err(TrySendError::Disconnected(envelope)) => {
                envelope.reject();
                Err(PoolError::Closed)
            }
        }
    }

    /// Wait for in-flight submissions to settle, then drop the sender.
    pub async fn seal(&self) {
        let mut gate = self.gate.write().await;
        gate.take();
    }
}
