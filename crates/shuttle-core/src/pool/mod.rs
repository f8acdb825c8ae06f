//! Worker pool: a fixed set of workers consuming a shared intake queue.
//!
//! # Lifecycle
//! 1. [`PoolBuilder::build`] spawns the workers on the current tokio runtime.
//! 2. [`Pool::submit`] / [`Pool::try_submit`] hand items to whichever worker
//!    is free. Items may finish in any order.
//! 3. [`Pool::shutdown`] raises the broadcast signal once. Each worker
//!    finishes its current item, then either exits or drains the queue,
//!    depending on the [`DrainPolicy`].
//! 4. [`Pool::wait`] resolves after every worker is `Stopped`.
//!
//! Failures inside items never reach the caller of `submit`; they go to the
//! error callback as [`WorkerError`]s. The pool never retries an item.

mod intake;
mod report;
mod worker;

use std::sync::{Arc, OnceLock};

use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tracing::Instrument;

pub use self::report::ErrorCallback;
pub use crate::config::{DrainPolicy, QueueCapacity};

use self::intake::{Envelope, Intake};
use self::report::Reporter;
use self::worker::{WorkerContext, worker_loop};
use crate::config::PoolConfig;
use crate::domain::{ItemId, WorkItem, WorkerId, WorkerState};
use crate::error::{BuildError, PoolError, WorkerError};
use crate::observability::{Counters, PoolStats};
use crate::signal::Signal;

/// Builds a [`Pool`].
///
/// ```ignore
/// let pool = PoolBuilder::new(4)
///     .queue_capacity(QueueCapacity::Bounded(0))
///     .drain_policy(DrainPolicy::StopImmediately)
///     .on_error(|e| eprintln!("{e}"))
///     .build()?;
/// ```
pub struct PoolBuilder {
    workers: usize,
    queue_capacity: QueueCapacity,
    drain_policy: DrainPolicy,
    on_error: Option<ErrorCallback>,
}

impl PoolBuilder {
    pub fn new(workers: usize) -> Self {
        Self {
            workers,
            queue_capacity: QueueCapacity::default(),
            drain_policy: DrainPolicy::default(),
            on_error: None,
        }
    }

    pub fn from_config(config: &PoolConfig) -> Self {
        Self::new(config.workers)
            .queue_capacity(config.queue_capacity)
            .drain_policy(config.drain_policy)
    }

    pub fn queue_capacity(mut self, capacity: QueueCapacity) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Policy used by [`Pool::shutdown`] and when the pool is dropped.
    pub fn drain_policy(mut self, policy: DrainPolicy) -> Self {
        self.drain_policy = policy;
        self
    }

    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(WorkerError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Deliver worker errors to a channel instead of a callback.
    ///
    /// Errors are dropped once the receiving side is gone.
    pub fn report_to(self, tx: mpsc::UnboundedSender<WorkerError>) -> Self {
        self.on_error(move |e| {
            let _ = tx.send(e);
        })
    }

    /// Validate and start the pool.
    ///
    /// # Errors
    /// - `NoWorkers` if the worker count is zero.
    /// - `NoRuntime` if called outside a tokio runtime.
    pub fn build(self) -> Result<Pool, BuildError> {
        if self.workers == 0 {
            return Err(BuildError::NoWorkers);
        }
        let runtime = Handle::try_current().map_err(|_| BuildError::NoRuntime)?;

        let (intake, rx) = Intake::new(self.queue_capacity);
        let shutdown = Signal::new();
        let policy = Arc::new(OnceLock::new());
        let reporter = Arc::new(Reporter::new(self.workers, self.on_error));
        let live = Arc::new(watch::channel(self.workers).0);

        for index in 0..self.workers {
            let id = WorkerId::new(index);
            let ctx = WorkerContext {
                id,
                rx: rx.clone(),
                shutdown: shutdown.observer(),
                policy: Arc::clone(&policy),
                reporter: Arc::clone(&reporter),
                live: Arc::clone(&live),
            };
            runtime.spawn(worker_loop(ctx).instrument(tracing::debug_span!("worker", %id)));
        }

        tracing::debug!(
            workers = self.workers,
            capacity = ?self.queue_capacity,
            policy = ?self.drain_policy,
            "pool started"
        );

        Ok(Pool {
            inner: Arc::new(Inner {
                workers: self.workers,
                default_policy: self.drain_policy,
                intake,
                shutdown,
                sealed: Signal::new(),
                policy,
                reporter,
                live,
                runtime,
            }),
        })
    }
}

struct Inner {
    workers: usize,
    default_policy: DrainPolicy,
    intake: Intake,
    shutdown: Signal,
    /// Raised after the intake sender is dropped.
    sealed: Signal,
    policy: Arc<OnceLock<DrainPolicy>>,
    reporter: Arc<Reporter>,
    live: Arc<watch::Sender<usize>>,
    runtime: Handle,
}

/// A running worker pool.
///
/// All methods take `&self`; share the pool behind an `Arc` to submit,
/// shut down or wait from several tasks at once. Dropping the pool shuts
/// it down with the configured policy.
pub struct Pool {
    inner: Arc<Inner>,
}

impl Pool {
    /// Shorthand for `PoolBuilder::from_config(config).build()`.
    pub fn new(config: &PoolConfig) -> Result<Self, BuildError> {
        PoolBuilder::from_config(config).build()
    }

    pub fn builder(workers: usize) -> PoolBuilder {
        PoolBuilder::new(workers)
    }

    /// Submit an item, waiting for queue room (or, for a rendezvous queue,
    /// for a free worker).
    ///
    /// # Errors
    /// `PoolError::Closed` once shutdown has begun. An `Ok` means the item
    /// was accepted and will either run or be reported as discarded.
    pub async fn submit(&self, item: WorkItem) -> Result<ItemId, PoolError> {
        let id = ItemId::generate();
        let envelope = Envelope::new(id, item, Arc::clone(&self.inner.reporter));
        let result = self.inner.intake.push(envelope, &self.inner.shutdown).await;
        self.account(id, result)
    }

    /// Submit without waiting.
    ///
    /// # Errors
    /// `PoolError::Full` if the queue has no room right now (always the case
    /// for a rendezvous queue unless a worker is already waiting), and
    /// `PoolError::Closed` once shutdown has begun.
    pub fn try_submit(&self, item: WorkItem) -> Result<ItemId, PoolError> {
        let id = ItemId::generate();
        let envelope = Envelope::new(id, item, Arc::clone(&self.inner.reporter));
        let result = self.inner.intake.try_push(envelope, &self.inner.shutdown);
        self.account(id, result)
    }

    fn account(&self, id: ItemId, result: Result<(), PoolError>) -> Result<ItemId, PoolError> {
        let counters = self.inner.reporter.counters();
        match result {
            Ok(()) => {
                Counters::bump(&counters.submitted);
                tracing::trace!(item = %id, "work item accepted");
                Ok(id)
            }
            Err(e) => {
                Counters::bump(&counters.rejected);
                tracing::trace!(item = %id, error = %e, "work item rejected");
                Err(e)
            }
        }
    }

    /// Shut down with the configured [`DrainPolicy`].
    pub fn shutdown(&self) {
        self.shutdown_with(self.inner.default_policy);
    }

    /// Shut down with an explicit policy.
    ///
    /// Only the first call has any effect; its policy wins. Returns
    /// immediately: use [`wait`](Self::wait) to block until workers stop.
    pub fn shutdown_with(&self, policy: DrainPolicy) {
        // 最初の 1 回だけ有効。policy もその呼び出しのものを使う
        if self.inner.policy.set(policy).is_err() {
            tracing::trace!("shutdown already requested");
            return;
        }
        if !self.inner.shutdown.raise() {
            return;
        }
        tracing::info!(?policy, "pool shutting down");

        let inner = Arc::clone(&self.inner);
        self.inner.runtime.spawn(async move {
            inner.intake.seal().await;
            inner.sealed.raise();
            tracing::debug!("pool intake sealed");
        });
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_raised()
    }

    /// Resolve once every worker has stopped and the intake is sealed.
    ///
    /// Safe to call from many tasks at once; all of them are released.
    /// Before `shutdown` is called this simply keeps waiting.
    pub async fn wait(&self) {
        self.inner.sealed.observer().raised().await;
        let mut live = self.inner.live.subscribe();
        let _ = live.wait_for(|n| *n == 0).await;
    }

    pub fn workers(&self) -> usize {
        self.inner.workers
    }

    pub fn stats(&self) -> PoolStats {
        self.inner.reporter.stats()
    }

    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.inner.reporter.counters().worker_states()
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
