//! WorkItem - one opaque unit of work for the pool.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;

use crate::error::BoxError;
use crate::ports::Handler;

type Thunk = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), BoxError>> + Send>;

/// A zero-argument callable that owns its inputs.
///
/// Design intent:
/// - The closure is moved in at construction, so every item carries its own
///   copy of whatever it captured. Nothing is read from a shared binding later.
/// - The future is not created until a worker claims the item. Constructing
///   it and polling it both happen inside the worker's panic boundary.
/// - Once submitted the item is owned by the queue, then by exactly one
///   worker. It is consumed by execution and cannot run twice.
pub struct WorkItem {
    label: Option<String>,
    thunk: Thunk,
}

impl WorkItem {
    /// Wrap an async closure.
    pub fn new<F, Fut, E>(f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError>,
    {
        Self {
            label: None,
            thunk: Box::new(move || async move { f().await.map_err(Into::into) }.boxed()),
        }
    }

    /// Wrap a synchronous closure.
    ///
    /// It runs inline on the worker; keeping it short is the caller's job.
    pub fn from_fn<F, E>(f: F) -> Self
    where
        F: FnOnce() -> Result<(), E> + Send + 'static,
        E: Into<BoxError>,
    {
        Self {
            label: None,
            thunk: Box::new(move || async move { f().map_err(Into::into) }.boxed()),
        }
    }

    /// Pair a shared handler with the value it should process.
    pub fn handled<T, H>(handler: Arc<H>, input: T) -> Self
    where
        T: Send + 'static,
        H: Handler<T> + ?Sized + 'static,
    {
        Self {
            label: None,
            thunk: Box::new(move || async move { handler.handle(input).await }.boxed()),
        }
    }

    /// Attach a human-readable label that shows up in logs.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub(crate) fn into_future(self) -> BoxFuture<'static, Result<(), BoxError>> {
        let thunk = self.thunk;
        async move { thunk().await }.boxed()
    }
}

impl fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkItem")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}
