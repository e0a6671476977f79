use std::sync::Arc;

use parking_lot::RwLock;

use crate::ChangeVector;
use crate::Error;
use crate::SubscriberError;

/// Passed to after-acknowledgment observers
#[derive(Debug, Clone, PartialEq)]
pub struct AckInfo {
    pub subscription_name: String,
    /// Change vector sent as the acknowledgment
    pub change_vector: ChangeVector,
    /// Items in the acknowledged batch
    pub items: usize,
}

type Listener<A> = Arc<dyn Fn(&A) + Send + Sync>;

/// Observers registered on one worker instance
///
/// Listeners may be added while the worker runs; they are called on the
/// worker task and must not block.
#[derive(Clone, Default)]
pub(crate) struct WorkerListeners {
    on_connection_retry: Arc<RwLock<Vec<Listener<Error>>>>,
    after_acknowledgment: Arc<RwLock<Vec<Listener<AckInfo>>>>,
    on_unexpected_subscription_error: Arc<RwLock<Vec<Listener<SubscriberError>>>>,
}

impl WorkerListeners {
    pub(crate) fn add_on_connection_retry(
        &self,
        listener: Listener<Error>,
    ) {
        self.on_connection_retry.write().push(listener);
    }

    pub(crate) fn add_after_acknowledgment(
        &self,
        listener: Listener<AckInfo>,
    ) {
        self.after_acknowledgment.write().push(listener);
    }

    pub(crate) fn add_on_unexpected_subscription_error(
        &self,
        listener: Listener<SubscriberError>,
    ) {
        self.on_unexpected_subscription_error.write().push(listener);
    }

    pub(crate) fn connection_retry(
        &self,
        error: &Error,
    ) {
        notify(&self.on_connection_retry, error);
    }

    pub(crate) fn acknowledged(
        &self,
        info: &AckInfo,
    ) {
        notify(&self.after_acknowledgment, info);
    }

    pub(crate) fn unexpected_subscription_error(
        &self,
        error: &SubscriberError,
    ) {
        notify(&self.on_unexpected_subscription_error, error);
    }
}

fn notify<A>(
    listeners: &RwLock<Vec<Listener<A>>>,
    arg: &A,
) {
    // Snapshot so a listener may register more listeners
    let snapshot: Vec<Listener<A>> = listeners.read().clone();
    for listener in snapshot {
        listener(arg);
    }
}
