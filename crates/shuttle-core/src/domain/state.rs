//! Lifecycle states for workers and race attempts.

use serde::{Deserialize, Serialize};

/// Worker lifecycle.
///
/// State transitions:
/// - Idle -> Running -> Idle -> ... (one round trip per item)
/// - Idle -> Stopped (after observing shutdown, or when the intake closes)
///
/// `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerState {
    Idle,
    Running,
    Stopped,
}

impl WorkerState {
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkerState::Stopped)
    }

    pub(crate) fn as_u8(self) -> u8 {
        match self {
            WorkerState::Idle => 0,
            WorkerState::Running => 1,
            WorkerState::Stopped => 2,
        }
    }

    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            0 => WorkerState::Idle,
            1 => WorkerState::Running,
            _ => WorkerState::Stopped,
        }
    }
}

/// Lifecycle of one source's attempt inside a race.
///
/// State transitions:
/// - Started -> Succeeded -> Won (took the result slot while the caller waited)
/// - Started -> Succeeded -> Lost (slot already taken by another attempt)
/// - Started -> Failed -> Lost
/// - Started/Succeeded/Failed -> Abandoned (dispatcher already returned)
///
/// Exactly one attempt per dispatch can end in `Won`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptState {
    Started,
    Succeeded,
    Failed,
    Won,
    Lost,
    Abandoned,
}

impl AttemptState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AttemptState::Won | AttemptState::Lost | AttemptState::Abandoned
        )
    }
}
