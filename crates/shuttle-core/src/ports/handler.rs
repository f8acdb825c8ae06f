//! Handler port - typed work executed by the pool.

use async_trait::async_trait;

use crate::error::BoxError;

/// Handler executes one input value of type `T`.
///
/// This is the "data value + discriminator" form of a work item: the handler
/// type is the discriminator, the input is the data. A handler is shared by
/// every item that names it, so it must be `Send + Sync`.
///
/// ```ignore
/// struct Resize;
///
/// #[async_trait]
/// impl Handler<ImageJob> for Resize {
///     async fn handle(&self, job: ImageJob) -> Result<(), BoxError> {
///         resize(&job.path, job.width).await?;
///         Ok(())
///     }
/// }
///
/// pool.submit(WorkItem::handled(Arc::new(Resize), job)).await?;
/// ```
#[async_trait]
pub trait Handler<T: Send + 'static>: Send + Sync {
    async fn handle(&self, input: T) -> Result<(), BoxError>;
}
