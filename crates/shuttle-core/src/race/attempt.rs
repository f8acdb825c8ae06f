//! One source's run inside a race.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::FutureExt;
use tokio::time::Instant;

use crate::domain::AttemptState;
use crate::error::{AttemptFailure, DispatchError, panic_message};
use crate::ports::Source;
use crate::signal::SignalObserver;

use super::Won;
use super::slot::{Delivery, ResultSlot};

pub(crate) type Verdict<R> = Result<Won<R>, DispatchError>;

/// State shared by every attempt of one dispatch.
pub(crate) struct Race<R> {
    slot: ResultSlot<Verdict<R>>,
    abandon: SignalObserver,
    /// Attempts that have not failed yet.
    remaining: AtomicUsize,
    failures: Mutex<Vec<AttemptFailure>>,
    started: Instant,
}

impl<R> Race<R> {
    pub fn new(slot: ResultSlot<Verdict<R>>, abandon: SignalObserver, attempts: usize) -> Self {
        Self {
            slot,
            abandon,
            remaining: AtomicUsize::new(attempts),
            failures: Mutex::new(Vec::with_capacity(attempts)),
            started: Instant::now(),
        }
    }

    /// Record one failure. The last one to fail delivers `AllFailed`.
    fn fail(&self, failure: AttemptFailure) -> Delivery {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(failure);

        // まだ失敗していない attempt が残っていれば何もしない
        if self.remaining.fetch_sub(1, Ordering::AcqRel) != 1 {
            return Delivery::Taken;
        }
        let mut failures =
            std::mem::take(&mut *self.failures.lock().unwrap_or_else(PoisonError::into_inner));
        failures.sort_by_key(|f| f.source);
        self.slot.offer(Err(DispatchError::AllFailed { failures }))
    }
}

/// Counts a running attempt for as long as it lives.
pub(crate) struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    pub fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(Arc::clone(counter))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

pub(crate) struct Attempt<Q, R> {
    pub index: usize,
    pub source: Arc<dyn Source<Q, R>>,
    /// This attempt's own copy of the query.
    pub query: Q,
    pub race: Arc<Race<R>>,
    pub in_flight: InFlight,
}

impl<Q, R> Attempt<Q, R>
where
    Q: Send + 'static,
    R: Send + 'static,
{
    /// Run the source call and try to deliver its outcome. Returns the
    /// terminal state the attempt ended in.
    pub async fn run(self) -> AttemptState {
        let Attempt {
            index,
            source,
            query,
            race,
            in_flight: _in_flight,
        } = self;
        let name = source.name().to_string();
        tracing::trace!(source = index, %name, state = ?AttemptState::Started, "attempt started");

        let outcome = tokio::select! {
            biased;
            _ = race.abandon.raised() => {
                tracing::trace!(source = index, %name, "attempt abandoned mid-call");
                return AttemptState::Abandoned;
            }
            outcome = AssertUnwindSafe(source.call(query)).catch_unwind() => outcome,
        };

        let (settled, delivery) = match outcome {
            Ok(Ok(value)) => {
                let won = Won {
                    source: index,
                    name: name.clone(),
                    value,
                    elapsed: race.started.elapsed(),
                };
                (AttemptState::Succeeded, race.slot.offer(Ok(won)))
            }
            Ok(Err(e)) => {
                let message = e.to_string();
                tracing::debug!(source = index, %name, %message, "attempt failed");
                let delivery = race.fail(AttemptFailure {
                    source: index,
                    name: name.clone(),
                    message,
                });
                (AttemptState::Failed, delivery)
            }
            Err(payload) => {
                let message = format!("panicked: {}", panic_message(payload.as_ref()));
                tracing::warn!(source = index, %name, %message, "attempt panicked");
                let delivery = race.fail(AttemptFailure {
                    source: index,
                    name: name.clone(),
                    message,
                });
                (AttemptState::Failed, delivery)
            }
        };

        let state = match (settled, delivery) {
            (AttemptState::Succeeded, Delivery::Delivered) => AttemptState::Won,
            (_, Delivery::Closed) => AttemptState::Abandoned,
            _ if race.abandon.is_raised() => AttemptState::Abandoned,
            _ => AttemptState::Lost,
        };
        tracing::trace!(source = index, %name, from = ?settled, to = ?state, "attempt settled");
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use crate::ports::FnSource;
    use crate::signal::Signal;
    use std::time::Duration;

    fn source<F, Fut>(name: &str, f: F) -> Arc<dyn Source<u32, u32>>
    where
        F: Fn(u32) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<u32, BoxError>> + Send + 'static,
    {
        Arc::new(FnSource::new(name, f))
    }

    fn attempt(
        index: usize,
        source: Arc<dyn Source<u32, u32>>,
        race: &Arc<Race<u32>>,
        counter: &Arc<AtomicUsize>,
    ) -> Attempt<u32, u32> {
        Attempt {
            index,
            source,
            query: 7,
            race: Arc::clone(race),
            in_flight: InFlight::enter(counter),
        }
    }

    #[tokio::test]
    async fn success_into_open_slot_wins() {
        let (slot, rx) = ResultSlot::new();
        let abandon = Signal::new();
        let race = Arc::new(Race::new(slot, abandon.observer(), 1));
        let counter = Arc::new(AtomicUsize::new(0));

        let s = source("double", |q| async move { Ok(q * 2) });
        let state = attempt(0, s, &race, &counter).run().await;

        assert_eq!(state, AttemptState::Won);
        let won = rx.await.unwrap().unwrap();
        assert_eq!(won.value, 14);
        assert_eq!(won.name, "double");
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn second_success_loses() {
        let (slot, _rx) = ResultSlot::new();
        let abandon = Signal::new();
        let race = Arc::new(Race::new(slot, abandon.observer(), 2));
        let counter = Arc::new(AtomicUsize::new(0));

        let s = source("same", |q| async move { Ok(q) });
        let first = attempt(0, Arc::clone(&s), &race, &counter).run().await;
        let second = attempt(1, s, &race, &counter).run().await;

        assert_eq!(first, AttemptState::Won);
        assert_eq!(second, AttemptState::Lost);
    }

    #[tokio::test]
    async fn last_failure_delivers_all_failed() {
        let (slot, rx) = ResultSlot::new();
        let abandon = Signal::new();
        let race = Arc::new(Race::new(slot, abandon.observer(), 2));
        let counter = Arc::new(AtomicUsize::new(0));

        let broken = source("broken", |_| async { Err::<u32, BoxError>("refused".into()) });
        attempt(1, Arc::clone(&broken), &race, &counter).run().await;
        attempt(0, broken, &race, &counter).run().await;

        let Err(DispatchError::AllFailed { failures }) = rx.await.unwrap() else {
            panic!("expected AllFailed");
        };
        assert_eq!(
            failures.iter().map(|f| f.source).collect::<Vec<_>>(),
            vec![0, 1]
        );
        assert!(failures.iter().all(|f| f.message == "refused"));
    }

    #[tokio::test]
    async fn panic_becomes_failure() {
        let (slot, rx) = ResultSlot::new();
        let abandon = Signal::new();
        let race = Arc::new(Race::new(slot, abandon.observer(), 1));
        let counter = Arc::new(AtomicUsize::new(0));

        async fn explode(_: u32) -> Result<u32, BoxError> {
            panic!("replica crashed")
        }
        let state = attempt(0, source("explode", explode), &race, &counter)
            .run()
            .await;

        assert_eq!(state, AttemptState::Lost);
        let Err(DispatchError::AllFailed { failures }) = rx.await.unwrap() else {
            panic!("expected AllFailed");
        };
        assert_eq!(failures[0].message, "panicked: replica crashed");
    }

    #[tokio::test(start_paused = true)]
    async fn abandon_stops_a_pending_call() {
        let (slot, _rx) = ResultSlot::new();
        let abandon = Signal::new();
        let race = Arc::new(Race::new(slot, abandon.observer(), 1));
        let counter = Arc::new(AtomicUsize::new(0));

        let slow = source("slow", |q| async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(q)
        });
        let running = tokio::spawn(attempt(0, slow, &race, &counter).run());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        abandon.raise();
        assert_eq!(running.await.unwrap(), AttemptState::Abandoned);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn success_after_receiver_closed_is_abandoned() {
        let (slot, mut rx) = ResultSlot::new();
        let abandon = Signal::new();
        let race = Arc::new(Race::new(slot, abandon.observer(), 1));
        let counter = Arc::new(AtomicUsize::new(0));

        rx.close();
        let s = source("late", |q| async move { Ok(q) });
        assert_eq!(
            attempt(0, s, &race, &counter).run().await,
            AttemptState::Abandoned
        );
    }
}
