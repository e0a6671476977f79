use tonic::async_trait;

use crate::BoxError;
use crate::SubscriberError;
use crate::SubscriptionBatch;

/// User logic applied to every delivered batch
///
/// Invoked exactly once per batch and never concurrently for the same
/// worker. Returning an error prevents the acknowledgment of the batch
/// unless the worker ignores subscriber errors.
///
/// Synchronous closures implement this trait directly:
///
/// ```ignore
/// worker.run(|batch: &SubscriptionBatch<Order>| -> Result<(), BoxError> {
///     for item in batch.items() {
///         println!("{}", item.key);
///     }
///     Ok(())
/// })?;
/// ```
#[async_trait]
pub trait BatchProcessor<T: Send + Sync>: Send + Sync + 'static {
    async fn process(
        &self,
        batch: &SubscriptionBatch<T>,
    ) -> Result<(), BoxError>;
}

#[async_trait]
impl<T, F, E> BatchProcessor<T> for F
where
    T: Send + Sync,
    F: Fn(&SubscriptionBatch<T>) -> Result<(), E> + Send + Sync + 'static,
    E: Into<BoxError>,
{
    async fn process(
        &self,
        batch: &SubscriptionBatch<T>,
    ) -> Result<(), BoxError> {
        (self)(batch).map_err(Into::into)
    }
}

/// Run `processor` over `batch`, wrapping a failure with the batch context
pub(crate) async fn process_batch<T, P>(
    processor: &P,
    batch: &SubscriptionBatch<T>,
) -> Result<(), SubscriberError>
where
    T: Send + Sync,
    P: BatchProcessor<T> + ?Sized,
{
    processor.process(batch).await.map_err(|source| {
        SubscriberError::new(
            batch.subscription_name(),
            batch.last_change_vector().cloned(),
            source,
        )
    })
}
