//! One-shot broadcast signal used for pool shutdown and race abandonment.
//!
//! The owner holds a [`Signal`]; everybody else gets a [`SignalObserver`],
//! which can only look at the signal or wait for it. There is no send side
//! on the observer, so no consumer can ever "send on a closed channel".

use tokio::sync::watch;

/// Owning side of a broadcast event. Raised at most once, never lowered.
#[derive(Debug)]
pub struct Signal {
    tx: watch::Sender<bool>,
}

impl Signal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Raise the signal.
    ///
    /// Returns `true` only for the call that changed the state. Concurrent and
    /// repeated calls are no-ops that return `false`.
    pub fn raise(&self) -> bool {
        self.tx.send_if_modified(|raised| {
            if *raised {
                false
            } else {
                *raised = true;
                true
            }
        })
    }

    pub fn is_raised(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn observer(&self) -> SignalObserver {
        SignalObserver {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only handle on a [`Signal`].
///
/// If the owning `Signal` is dropped before being raised, observers treat it
/// as raised.
#[derive(Debug, Clone)]
pub struct SignalObserver {
    rx: watch::Receiver<bool>,
}

impl SignalObserver {
    pub fn is_raised(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Resolve once the signal is raised (immediately if it already is).
    ///
    /// Cancel-safe: dropping the future before it resolves has no effect on
    /// the signal or on other observers.
    pub async fn raised(&self) {
        let mut rx = self.rx.clone();
        // Err means the Signal is gone, which counts as raised.
        let _ = rx.wait_for(|raised| *raised).await;
    }
}
