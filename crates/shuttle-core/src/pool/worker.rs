use std::panic::AssertUnwindSafe;
use std::sync::{Arc, OnceLock};

use futures::FutureExt;
use tokio::sync::watch;

use crate::config::DrainPolicy;
use crate::domain::{WorkerId, WorkerState};
use crate::error::{WorkerError, panic_message};
use crate::observability::Counters;
use crate::signal::SignalObserver;

use super::intake::Envelope;
use super::report::Reporter;

/// Everything one worker owns or observes.
pub(crate) struct WorkerContext {
    pub id: WorkerId,
    pub rx: flume::Receiver<Envelope>,
    pub shutdown: SignalObserver,
    /// Set once, before `shutdown` is raised.
    pub policy: Arc<OnceLock<DrainPolicy>>,
    pub reporter: Arc<Reporter>,
    pub live: Arc<watch::Sender<usize>>,
}

/// Marks the worker `Stopped` when dropped.
/// - panic unwind 中でも drop されるので、live カウントが残らない
struct StopGuard {
    id: WorkerId,
    reporter: Arc<Reporter>,
    live: Arc<watch::Sender<usize>>,
}

impl Drop for StopGuard {
    fn drop(&mut self) {
        self.reporter.set_worker(self.id.index(), WorkerState::Stopped);
        self.live.send_modify(|n| *n = n.saturating_sub(1));
        tracing::trace!(worker = %self.id, "worker stopped");
    }
}

pub(crate) async fn worker_loop(ctx: WorkerContext) {
    // Declared first so it drops last: the receiver is released before the
    // pool hears that this worker stopped.
    let _guard = StopGuard {
        id: ctx.id,
        reporter: Arc::clone(&ctx.reporter),
        live: ctx.live,
    };
    let WorkerContext {
        id,
        rx,
        shutdown,
        policy,
        reporter,
        ..
    } = ctx;

    tracing::trace!(worker = %id, "worker started");

    loop {
        // shutdown を先に見る (busy な queue でも止まれるように)
        let envelope = tokio::select! {
            biased;
            _ = shutdown.raised() => break,
            received = rx.recv_async() => match received {
                Ok(envelope) => envelope,
                // sealed かつ空 → 終了
                Err(_) => return,
            },
        };
        execute(id, envelope, &reporter).await;
    }

    match policy.get().copied().unwrap_or_default() {
        DrainPolicy::StopImmediately => {
            tracing::debug!(worker = %id, "shutdown observed, leaving queue as is");
        }
        DrainPolicy::DrainOnShutdown => {
            tracing::debug!(worker = %id, "shutdown observed, draining queue");
            while let Ok(envelope) = rx.recv_async().await {
                execute(id, envelope, &reporter).await;
            }
        }
    }
}

/// Run one item inside the panic boundary and account for the result.
async fn execute(id: WorkerId, envelope: Envelope, reporter: &Reporter) {
    let Some((item, work)) = envelope.open() else {
        return;
    };

    reporter.set_worker(id.index(), WorkerState::Running);
    tracing::trace!(worker = %id, %item, label = work.label(), "work item started");

    match AssertUnwindSafe(work.into_future()).catch_unwind().await {
        Ok(Ok(())) => {
            Counters::bump(&reporter.counters().completed);
            tracing::trace!(worker = %id, %item, "work item completed");
        }
        Ok(Err(e)) => reporter.report(WorkerError::Failed {
            worker: id,
            item,
            message: e.to_string(),
        }),
        Err(payload) => reporter.report(WorkerError::Panicked {
            worker: id,
            item,
            message: panic_message(payload.as_ref()),
        }),
    }

    reporter.set_worker(id.index(), WorkerState::Idle);
}
