use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::domain::WorkerState;

/// Point-in-time snapshot of a pool's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Items accepted into the intake queue.
    pub submitted: u64,
    /// Submissions refused with `Closed` or `Full`.
    pub rejected: u64,
    pub completed: u64,
    pub failed: u64,
    pub panicked: u64,
    /// Accepted items dropped by a stop-immediately shutdown.
    pub discarded: u64,

    pub workers_idle: usize,
    pub workers_running: usize,
    pub workers_stopped: usize,
}

impl PoolStats {
    /// Accepted items that have not been executed or discarded yet.
    pub fn outstanding(&self) -> u64 {
        self.submitted
            .saturating_sub(self.completed + self.failed + self.panicked + self.discarded)
    }
}

/// Shared counters behind [`PoolStats`].
#[derive(Debug)]
pub(crate) struct Counters {
    pub submitted: AtomicU64,
    pub rejected: AtomicU64,
    pub completed: AtomicU64,
    pub failed: AtomicU64,
    pub panicked: AtomicU64,
    pub discarded: AtomicU64,
    workers: Vec<AtomicU8>,
}

impl Counters {
    pub fn new(workers: usize) -> Self {
        Self {
            submitted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            panicked: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
            workers: (0..workers)
                .map(|_| AtomicU8::new(WorkerState::Idle.as_u8()))
                .collect(),
        }
    }

    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_worker(&self, index: usize, state: WorkerState) {
        if let Some(slot) = self.workers.get(index) {
            slot.store(state.as_u8(), Ordering::Release);
        }
    }

    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.workers
            .iter()
            .map(|slot| WorkerState::from_u8(slot.load(Ordering::Acquire)))
            .collect()
    }

    pub fn snapshot(&self) -> PoolStats {
        let mut stats = PoolStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            ..PoolStats::default()
        };
        for state in self.worker_states() {
            match state {
                WorkerState::Idle => stats.workers_idle += 1,
                WorkerState::Running => stats.workers_running += 1,
                WorkerState::Stopped => stats.workers_stopped += 1,
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_counts_worker_states() {
        let counters = Counters::new(3);
        counters.set_worker(0, WorkerState::Running);
        counters.set_worker(2, WorkerState::Stopped);
        Counters::bump(&counters.submitted);
        Counters::bump(&counters.submitted);
        Counters::bump(&counters.completed);

        let stats = counters.snapshot();
        assert_eq!(stats.workers_idle, 1);
        assert_eq!(stats.workers_running, 1);
        assert_eq!(stats.workers_stopped, 1);
        assert_eq!(stats.outstanding(), 1);
    }

    #[test]
    fn stats_serialize_as_flat_json() {
        let stats = PoolStats {
            submitted: 3,
            completed: 2,
            failed: 1,
            ..PoolStats::default()
        };
        let v = serde_json::to_value(&stats).unwrap();
        assert_eq!(v["submitted"], 3);
        assert_eq!(v["failed"], 1);
        assert_eq!(v["workers_stopped"], 0);
    }
}
