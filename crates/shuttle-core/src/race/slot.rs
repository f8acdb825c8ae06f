//! Single-capacity handoff for the winning result of a race.

use std::sync::{Mutex, PoisonError};

use tokio::sync::oneshot;

/// What happened to a value offered to a [`ResultSlot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    /// The value reached the waiting dispatcher.
    Delivered,
    /// Another attempt got there first.
    Taken,
    /// The dispatcher stopped waiting (timeout).
    Closed,
}

/// Holds the sending half of a oneshot until the first offer takes it.
///
/// An offer never waits: it either grabs the sender and sends (which
/// cannot block) or finds the slot empty and drops its value. Nothing ever
/// sends through a sender that was already used.
pub(crate) struct ResultSlot<T> {
    tx: Mutex<Option<oneshot::Sender<T>>>,
}

impl<T> ResultSlot<T> {
    pub fn new() -> (Self, oneshot::Receiver<T>) {
        let (tx, rx) = oneshot::channel();
        let slot = Self {
            tx: Mutex::new(Some(tx)),
        };
        (slot, rx)
    }

    pub fn offer(&self, value: T) -> Delivery {
        let tx = self
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match tx {
            None => Delivery::Taken,
            Some(tx) => match tx.send(value) {
                Ok(()) => Delivery::Delivered,
                Err(_) => Delivery::Closed,
            },
        }
    }
}
