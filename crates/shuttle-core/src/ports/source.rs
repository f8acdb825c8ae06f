//! Source port - one redundant backend a query can be raced against.

use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;

use crate::error::BoxError;

/// A backend that can answer a query of type `Q` with an `R`.
///
/// The dispatcher is transport-agnostic: it only ever sees this capability.
/// `call` may be cancelled by dropping its future once another source wins;
/// implementations that cannot be cancelled (e.g. blocking calls moved to a
/// thread) simply finish and have their result discarded.
#[async_trait]
pub trait Source<Q, R>: Send + Sync
where
    Q: Send + 'static,
    R: Send + 'static,
{
    async fn call(&self, query: Q) -> Result<R, BoxError>;

    /// Name used in logs and in `AttemptFailure`.
    fn name(&self) -> &str {
        "source"
    }
}

/// Adapts an async closure into a [`Source`].
pub struct FnSource<F, Q, R> {
    name: String,
    f: F,
    _marker: PhantomData<fn(Q) -> R>,
}

impl<F, Fut, Q, R> FnSource<F, Q, R>
where
    F: Fn(Q) -> Fut,
    Fut: Future<Output = Result<R, BoxError>>,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut, Q, R> Source<Q, R> for FnSource<F, Q, R>
where
    F: Fn(Q) -> Fut + Send + Sync,
    Fut: Future<Output = Result<R, BoxError>> + Send,
    Q: Send + 'static,
    R: Send + 'static,
{
    async fn call(&self, query: Q) -> Result<R, BoxError> {
        (self.f)(query).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}
