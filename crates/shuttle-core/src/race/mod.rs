//! First-result-wins fan-out over redundant sources.
//!
//! `dispatch` starts one attempt per source, all at once, and waits for the
//! first of:
//! - a success, which is returned as [`Won`];
//! - every source failing, reported as `DispatchError::AllFailed`;
//! - the timeout, reported as `DispatchError::Timeout`.
//!
//! Whatever the outcome, the abandon signal is raised before `dispatch`
//! returns. Attempts still waiting on their source drop the call and exit;
//! attempts that already have a result find the slot taken or closed and
//! throw it away. No attempt ever waits to hand over a result.

mod attempt;
mod slot;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::Serialize;
use tracing::Instrument;

use self::attempt::{Attempt, InFlight, Race, Verdict};
use self::slot::ResultSlot;
use crate::config::DispatchConfig;
use crate::domain::DispatchId;
use crate::error::DispatchError;
use crate::ports::Source;
use crate::signal::Signal;

/// The winning answer of a dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Won<R> {
    /// Position of the winning source in the slice passed to `dispatch`.
    pub source: usize,
    pub name: String,
    pub value: R,
    /// Time from the start of the dispatch to the answer.
    pub elapsed: Duration,
}

/// Races a query against a set of sources.
///
/// Cheap to clone; clones share the in-flight counter. Independent
/// dispatches can run concurrently on the same dispatcher.
#[derive(Debug, Clone, Default)]
pub struct Dispatcher {
    config: DispatchConfig,
    in_flight: Arc<AtomicUsize>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: DispatchConfig) -> Self {
        Self {
            config,
            in_flight: Arc::default(),
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Attempts still running, across every dispatch made through this
    /// dispatcher and its clones. Attempts outlive `dispatch` briefly while
    /// they observe the abandon signal.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// [`dispatch`](Self::dispatch) with the configured default timeout.
    pub async fn dispatch_default<Q, R>(
        &self,
        sources: &[Arc<dyn Source<Q, R>>],
        query: Q,
    ) -> Result<Won<R>, DispatchError>
    where
        Q: Clone + Send + 'static,
        R: Send + 'static,
    {
        self.dispatch(sources, query, self.config.default_timeout)
            .await
    }

    /// Query every source concurrently and return the first success.
    ///
    /// Each attempt gets its own clone of `query`. Attempts are spawned onto
    /// the current tokio runtime.
    ///
    /// # Panics
    /// When polled outside a tokio runtime with at least one source, since
    /// the attempts cannot be spawned. (Pool と違い Result にはしない)
    ///
    /// # Errors
    /// - `Timeout` if nothing was delivered within `timeout`.
    /// - `AllFailed` if every source failed or panicked, or if `sources` is
    ///   empty.
    pub async fn dispatch<Q, R>(
        &self,
        sources: &[Arc<dyn Source<Q, R>>],
        query: Q,
        timeout: Duration,
    ) -> Result<Won<R>, DispatchError>
    where
        Q: Clone + Send + 'static,
        R: Send + 'static,
    {
        let id = DispatchId::generate();
        let span = tracing::debug_span!("dispatch", %id, sources = sources.len());
        self.race(sources, query, timeout).instrument(span).await
    }

    async fn race<Q, R>(
        &self,
        sources: &[Arc<dyn Source<Q, R>>],
        query: Q,
        timeout: Duration,
    ) -> Result<Won<R>, DispatchError>
    where
        Q: Clone + Send + 'static,
        R: Send + 'static,
    {
        if sources.is_empty() {
            tracing::debug!("no sources given");
            return Err(DispatchError::AllFailed {
                failures: Vec::new(),
            });
        }

        let (slot, mut rx) = ResultSlot::new();
        let abandon = Signal::new();
        let race = Arc::new(Race::new(slot, abandon.observer(), sources.len()));

        for (index, source) in sources.iter().enumerate() {
            let attempt = Attempt {
                index,
                source: Arc::clone(source),
                query: query.clone(),
                race: Arc::clone(&race),
                in_flight: InFlight::enter(&self.in_flight),
            };
            tokio::spawn(
                attempt
                    .run()
                    .instrument(tracing::trace_span!("attempt", source = index)),
            );
        }
        // ここから先 slot を持つのは attempt だけ
        drop(race);

        let verdict: Verdict<R> = match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(verdict)) => verdict,
            // Every attempt went away without delivering (runtime shutdown).
            Ok(Err(_)) => Err(DispatchError::AllFailed {
                failures: Vec::new(),
            }),
            Err(_) => {
                // Closing first means any later offer sees `Closed`; a value
                // that slipped in just before still counts.
                rx.close();
                rx.try_recv()
                    .unwrap_or(Err(DispatchError::Timeout { after: timeout }))
            }
        };
        abandon.raise();

        match &verdict {
            Ok(won) => tracing::debug!(
                source = won.source,
                name = %won.name,
                elapsed = ?won.elapsed,
                "dispatch answered"
            ),
            Err(e) => tracing::warn!(error = %e, "dispatch failed"),
        }
        verdict
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use crate::ports::FnSource;
    use rstest::rstest;
    use std::sync::Mutex;
    use tokio::time::Instant;

    type Sources = Vec<Arc<dyn Source<u32, u32>>>;

    fn delayed(name: &str, after: Duration, answer: Result<u32, &'static str>) -> Arc<dyn Source<u32, u32>> {
        Arc::new(FnSource::new(name, move |_q: u32| async move {
            tokio::time::sleep(after).await;
            answer.map_err(BoxError::from)
        }))
    }

    async fn settle(dispatcher: &Dispatcher) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while dispatcher.in_flight() > 0 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("attempts did not exit");
    }

    #[tokio::test(start_paused = true)]
    async fn fastest_success_wins_and_losers_exit() {
        let dispatcher = Dispatcher::new();
        let sources: Sources = vec![
            delayed("replica-1", Duration::from_millis(80), Ok(1)),
            delayed("replica-2", Duration::from_millis(10), Ok(42)),
            delayed("replica-3", Duration::from_millis(30), Err("unavailable")),
        ];

        let won = dispatcher
            .dispatch(&sources, 0, Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(won.value, 42);
        assert_eq!(won.source, 1);
        assert_eq!(won.name, "replica-2");
        assert!(won.elapsed >= Duration::from_millis(10));
        settle(&dispatcher).await;
    }

    #[tokio::test(start_paused = true)]
    async fn blocked_sources_time_out_within_margin() {
        let dispatcher = Dispatcher::new();
        let sources: Sources = (0..3)
            .map(|i| delayed(&format!("stuck-{i}"), Duration::from_secs(10), Ok(i)))
            .collect();

        let started = Instant::now();
        let err = dispatcher
            .dispatch(&sources, 0, Duration::from_millis(100))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            DispatchError::Timeout {
                after: Duration::from_millis(100)
            }
        );
        assert!(started.elapsed() <= Duration::from_millis(150));
        settle(&dispatcher).await;
    }

    #[tokio::test]
    async fn no_sources_fail_immediately() {
        let dispatcher = Dispatcher::new();
        let sources: Sources = Vec::new();

        let err = tokio::time::timeout(
            Duration::from_millis(100),
            dispatcher.dispatch(&sources, 0, Duration::from_secs(60)),
        )
        .await
        .expect("empty dispatch must not block")
        .unwrap_err();

        assert_eq!(err, DispatchError::AllFailed { failures: vec![] });
    }

    #[rstest]
    #[case(1)]
    #[case(3)]
    #[case(8)]
    #[tokio::test]
    async fn every_failure_is_collected(#[case] n: usize) {
        let dispatcher = Dispatcher::new();
        let sources: Sources = (0..n)
            .map(|i| delayed(&format!("down-{i}"), Duration::from_millis(1), Err("down")))
            .collect();

        let err = dispatcher
            .dispatch(&sources, 0, Duration::from_secs(5))
            .await
            .unwrap_err();

        let DispatchError::AllFailed { failures } = err else {
            panic!("expected AllFailed, got {err:?}");
        };
        assert_eq!(failures.len(), n);
        assert_eq!(
            failures.iter().map(|f| f.source).collect::<Vec<_>>(),
            (0..n).collect::<Vec<_>>()
        );
        settle(&dispatcher).await;
    }

    #[tokio::test]
    async fn panicking_source_is_a_failure_not_a_crash() {
        async fn explode(_: u32) -> Result<u32, BoxError> {
            panic!("replica crashed")
        }
        let dispatcher = Dispatcher::new();
        let sources: Sources = vec![
            Arc::new(FnSource::new("explode", explode)),
            delayed("steady", Duration::from_millis(20), Ok(5)),
        ];

        let won = dispatcher
            .dispatch(&sources, 0, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(won.value, 5);

        let only_panics: Sources = vec![Arc::new(FnSource::new("explode", explode))];
        let err = dispatcher
            .dispatch(&only_panics, 0, Duration::from_secs(5))
            .await
            .unwrap_err();
        let DispatchError::AllFailed { failures } = err else {
            panic!("expected AllFailed");
        };
        assert!(failures[0].message.contains("replica crashed"));
        settle(&dispatcher).await;
    }

    #[tokio::test]
    async fn each_attempt_gets_its_own_query() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = Dispatcher::new();
        let sources: Vec<Arc<dyn Source<Vec<u32>, usize>>> = (0..4_u32)
            .map(|i| {
                let seen = Arc::clone(&seen);
                Arc::new(FnSource::new(format!("s{i}"), move |mut q: Vec<u32>| {
                    let seen = Arc::clone(&seen);
                    async move {
                        q.push(i);
                        seen.lock().unwrap().push(q.clone());
                        Err::<usize, BoxError>("keep going".into())
                    }
                })) as Arc<dyn Source<Vec<u32>, usize>>
            })
            .collect();

        let _ = dispatcher
            .dispatch(&sources, vec![100], Duration::from_secs(5))
            .await;
        settle(&dispatcher).await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 4);
        assert!(seen.iter().all(|q| q.len() == 2 && q[0] == 100));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_dispatches_are_independent() {
        let dispatcher = Dispatcher::new();
        let mut handles = Vec::new();
        for round in 0..16_u32 {
            let dispatcher = dispatcher.clone();
            handles.push(tokio::spawn(async move {
                let sources: Sources = vec![
                    delayed("slow", Duration::from_millis(30), Ok(0)),
                    delayed("fast", Duration::from_millis(1), Ok(round)),
                ];
                dispatcher
                    .dispatch(&sources, round, Duration::from_secs(5))
                    .await
            }));
        }
        for (round, h) in handles.into_iter().enumerate() {
            let won = h.await.unwrap().unwrap();
            assert_eq!(won.value, round as u32);
        }
        settle(&dispatcher).await;
    }

    #[test]
    #[should_panic]
    fn dispatch_outside_a_runtime_panics() {
        let dispatcher = Dispatcher::new();
        let sources: Sources = vec![Arc::new(FnSource::new("ready", |q: u32| async move {
            Ok::<_, BoxError>(q)
        }))];
        let _ = futures::executor::block_on(dispatcher.dispatch(
            &sources,
            1,
            Duration::from_millis(10),
        ));
    }

    #[test]
    fn empty_dispatch_needs_no_runtime() {
        let dispatcher = Dispatcher::new();
        let sources: Sources = Vec::new();
        let err = futures::executor::block_on(dispatcher.dispatch(
            &sources,
            1,
            Duration::from_millis(10),
        ))
        .unwrap_err();
        assert_eq!(err, DispatchError::AllFailed { failures: vec![] });
    }

    #[tokio::test(start_paused = true)]
    async fn default_timeout_comes_from_config() {
        let dispatcher = Dispatcher::from_config(DispatchConfig {
            default_timeout: Duration::from_millis(50),
        });
        let sources: Sources = vec![delayed("stuck", Duration::from_secs(10), Ok(1))];

        let err = dispatcher.dispatch_default(&sources, 0).await.unwrap_err();
        assert_eq!(
            err,
            DispatchError::Timeout {
                after: Duration::from_millis(50)
            }
        );
    }
}
