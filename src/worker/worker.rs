use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio::time::timeout;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::process_batch;
use super::AckInfo;
use super::BatchProcessor;
use super::ReconnectPolicy;
use super::RetryDecision;
use super::WorkerListeners;
use super::WorkerState;
use crate::metrics;
use crate::utils::scoped_timer::ScopedTimer;
use crate::ConnectionRequest;
use crate::Error;
use crate::ErrorKind;
use crate::NetworkError;
use crate::Result;
use crate::ServerMessage;
use crate::SubscriberError;
use crate::SubscriptionBatch;
use crate::SubscriptionConnection;
use crate::SubscriptionError;
use crate::SubscriptionOpeningStrategy;
use crate::SubscriptionTransport;
use crate::SubscriptionWorkerOptions;

/// Owns one logical connection to a subscription
///
/// Created through
/// [`DocumentSubscriptions::get_subscription_worker`](crate::DocumentSubscriptions::get_subscription_worker).
/// [`run`](Self::run) spawns the worker task: connect with the configured
/// opening strategy, receive batches, hand each one to the batch processor,
/// acknowledge it, and reconnect on recoverable failures until the
/// erroneous-period budget runs out.
///
/// The connection is released on every exit path. Dropping the worker
/// cancels the task like [`close`](Self::close) does, without waiting.
pub struct SubscriptionWorker<T = serde_json::Value> {
    inner: Arc<WorkerInner>,
    _marker: PhantomData<fn() -> T>,
}

struct WorkerInner {
    worker_id: String,
    database: String,
    options: SubscriptionWorkerOptions,
    transport: Arc<dyn SubscriptionTransport>,
    listeners: WorkerListeners,
    state_tx: watch::Sender<WorkerState>,
    cancel: CancellationToken,
    started: Mutex<bool>,
}

impl<T> SubscriptionWorker<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(
        options: SubscriptionWorkerOptions,
        database: impl Into<String>,
        transport: Arc<dyn SubscriptionTransport>,
    ) -> Self {
        let (state_tx, _) = watch::channel(WorkerState::Idle);
        Self {
            inner: Arc::new(WorkerInner {
                worker_id: nanoid::nanoid!(),
                database: database.into(),
                options,
                transport,
                listeners: WorkerListeners::default(),
                state_tx,
                cancel: CancellationToken::new(),
                started: Mutex::new(false),
            }),
            _marker: PhantomData,
        }
    }

    /// Start processing batches with `processor`
    ///
    /// Returns a handle resolving when the worker stops:
    /// - `Ok(())` after [`close`](Self::close) or an administrative close
    ///   (dropped, disabled, deleted, no documents left)
    /// - `Err` on a takeover, a fatal error, an unhandled subscriber error or
    ///   an exhausted erroneous period
    ///
    /// A worker runs at most once; a second call fails with `AlreadyRunning`.
    pub fn run<P>(
        &self,
        processor: P,
    ) -> Result<SubscriptionRunHandle>
    where
        P: BatchProcessor<T>,
    {
        let mut started = self.inner.started.lock();
        if *started {
            return Err(SubscriptionError::AlreadyRunning {
                name: self.inner.options.subscription_name().to_string(),
            }
            .into());
        }
        *started = true;

        let inner = self.inner.clone();
        let handle = tokio::spawn(run_worker::<T, P>(inner, processor));
        Ok(SubscriptionRunHandle { handle })
    }
}

impl<T> SubscriptionWorker<T> {
    pub fn worker_id(&self) -> &str {
        &self.inner.worker_id
    }

    pub fn subscription_name(&self) -> &str {
        self.inner.options.subscription_name()
    }

    pub fn options(&self) -> &SubscriptionWorkerOptions {
        &self.inner.options
    }

    pub fn state(&self) -> WorkerState {
        *self.inner.state_tx.borrow()
    }

    /// Follow state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<WorkerState> {
        self.inner.state_tx.subscribe()
    }

    /// Stop the worker and wait until its connection is released
    ///
    /// Idempotent. A batch whose processing is interrupted is not acknowledged.
    pub async fn close(&self) {
        self.inner.cancel.cancel();

        {
            let started = self.inner.started.lock();
            if !*started {
                self.inner.state_tx.send_replace(WorkerState::Closed);
                return;
            }
        }

        let mut state_rx = self.inner.state_tx.subscribe();
        // The sender lives in `inner`, so this only ends on a terminal state
        let _ = state_rx.wait_for(WorkerState::is_terminal).await;
    }

    /// Called once per reconnect attempt with the error that triggered it
    pub fn add_on_connection_retry<F>(
        &self,
        listener: F,
    ) where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.inner.listeners.add_on_connection_retry(Arc::new(listener));
    }

    /// Called after the server confirmed an acknowledgment
    pub fn add_after_acknowledgment<F>(
        &self,
        listener: F,
    ) where
        F: Fn(&AckInfo) + Send + Sync + 'static,
    {
        self.inner.listeners.add_after_acknowledgment(Arc::new(listener));
    }

    /// Called when a subscriber error is swallowed because the worker ignores them
    pub fn add_on_unexpected_subscription_error<F>(
        &self,
        listener: F,
    ) where
        F: Fn(&SubscriberError) + Send + Sync + 'static,
    {
        self.inner.listeners.add_on_unexpected_subscription_error(Arc::new(listener));
    }
}

impl<T> Drop for SubscriptionWorker<T> {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}

/// Completion of a running worker
///
/// Dropping the handle does not stop the worker.
pub struct SubscriptionRunHandle {
    handle: JoinHandle<Result<()>>,
}

impl Future for SubscriptionRunHandle {
    type Output = Result<()>;

    fn poll(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Self::Output> {
        Pin::new(&mut self.handle).poll(cx).map(|joined| match joined {
            Ok(result) => result,
            Err(e) => Err(NetworkError::TaskFailed(e).into()),
        })
    }
}

/// Marks the worker `Faulted` if the task unwinds without reaching a terminal state
struct TerminalStateGuard {
    inner: Arc<WorkerInner>,
}

impl Drop for TerminalStateGuard {
    fn drop(&mut self) {
        self.inner.state_tx.send_if_modified(|state| {
            if state.is_terminal() {
                false
            } else {
                *state = WorkerState::Faulted;
                true
            }
        });
        metrics::ACTIVE_WORKERS
            .with_label_values(&[self.inner.options.subscription_name()])
            .dec();
    }
}

async fn run_worker<T, P>(
    inner: Arc<WorkerInner>,
    processor: P,
) -> Result<()>
where
    T: DeserializeOwned + Send + Sync + 'static,
    P: BatchProcessor<T>,
{
    let name = inner.options.subscription_name().to_string();
    metrics::ACTIVE_WORKERS.with_label_values(&[&name]).inc();
    let _guard = TerminalStateGuard { inner: inner.clone() };

    info!(subscription = %name, worker_id = %inner.worker_id, "subscription worker started");

    let cancel = inner.cancel.clone();
    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!(subscription = %name, "subscription worker cancelled");
            Ok(())
        }
        result = supervise::<T, P>(&inner, &processor) => result,
    };
    // The connection lived inside `supervise` and is released at this point

    match &result {
        Ok(()) => {
            info!(subscription = %name, "subscription worker closed");
            set_state(&inner, WorkerState::Closed);
        }
        Err(e) if e.kind() == ErrorKind::Closed => {
            warn!(subscription = %name, error = %e, "subscription worker closed by server");
            set_state(&inner, WorkerState::Closed);
        }
        Err(e) => {
            error!(subscription = %name, error = %e, "subscription worker faulted");
            set_state(&inner, WorkerState::Faulted);
        }
    }
    result
}

/// Reconnect loop around [`session`]
async fn supervise<T, P>(
    inner: &WorkerInner,
    processor: &P,
) -> Result<()>
where
    T: DeserializeOwned + Send + Sync + 'static,
    P: BatchProcessor<T>,
{
    let options = &inner.options;
    let mut policy = ReconnectPolicy::new(
        options.max_erroneous_period(),
        options.time_to_wait_before_connection_retry(),
    );

    loop {
        let error = match session::<T, P>(inner, processor, &mut policy).await {
            Ok(()) => return Ok(()),
            // Disabled or deleted while connecting (or while queued under WaitForFree)
            Err(Error::Subscription(SubscriptionError::Closed { reason, .. })) if reason.is_administrative() => {
                info!(subscription = %options.subscription_name(), %reason, "subscription closed");
                return Ok(());
            }
            Err(e) if !e.is_recoverable() => return Err(e),
            Err(e) => e,
        };

        match policy.on_failure(Instant::now()) {
            RetryDecision::Escalate => {
                return Err(SubscriptionError::ErroneousPeriodExceeded {
                    name: options.subscription_name().to_string(),
                    period: policy.max_erroneous_period(),
                    last: Box::new(error),
                }
                .into());
            }
            RetryDecision::Retry(wait) => {
                warn!(
                    subscription = %options.subscription_name(),
                    error = %error,
                    downtime = ?policy.downtime(Instant::now()),
                    "connection failed, retrying in {:?}",
                    wait
                );
                metrics::CONNECTION_RETRIES
                    .with_label_values(&[options.subscription_name()])
                    .inc();
                set_state(inner, WorkerState::Connecting);
                inner.listeners.connection_retry(&error);
                sleep(wait).await;
            }
        }
    }
}

/// One connection, from handshake until it ends
///
/// `Ok(())` means the server closed the subscription administratively.
async fn session<T, P>(
    inner: &WorkerInner,
    processor: &P,
    policy: &mut ReconnectPolicy,
) -> Result<()>
where
    T: DeserializeOwned + Send + Sync + 'static,
    P: BatchProcessor<T>,
{
    let options = &inner.options;
    let name = options.subscription_name();

    set_state(inner, WorkerState::Connecting);
    let mut connection = connect(inner).await?;
    info!(subscription = %name, worker_id = %inner.worker_id, strategy = %options.strategy(), "connected");
    set_state(inner, WorkerState::Streaming);

    loop {
        let raw = match connection.next_message().await? {
            ServerMessage::Heartbeat => {
                debug!(subscription = %name, "heartbeat");
                continue;
            }
            ServerMessage::Closed(reason) if reason.is_administrative() => {
                info!(subscription = %name, %reason, "subscription closed");
                return Ok(());
            }
            ServerMessage::Closed(reason) => {
                return Err(SubscriptionError::Closed {
                    name: name.to_string(),
                    reason,
                }
                .into());
            }
            ServerMessage::Batch(raw) if raw.is_empty() => continue,
            ServerMessage::Batch(raw) => raw,
        };

        let batch = SubscriptionBatch::<T>::decode(name, raw)?;
        let Some(change_vector) = batch.last_change_vector().cloned() else {
            continue;
        };
        debug!(subscription = %name, items = batch.len(), %change_vector, "batch received");

        set_state(inner, WorkerState::Processing);
        metrics::BATCHES_PROCESSED.with_label_values(&[name]).inc();
        metrics::ITEMS_PROCESSED
            .with_label_values(&[name])
            .inc_by(batch.len() as u64);

        let started = Instant::now();
        let processed = {
            let _timer = ScopedTimer::new("process_batch");
            process_batch(processor, &batch).await
        };
        metrics::BATCH_PROCESSING_DURATION
            .with_label_values(&[name])
            .observe(started.elapsed().as_secs_f64() * 1000.0);

        if let Err(e) = processed {
            if !options.ignore_subscriber_errors() {
                metrics::SUBSCRIBER_ERRORS.with_label_values(&[name, "false"]).inc();
                return Err(e.into());
            }
            warn!(subscription = %name, error = %e, "subscriber error ignored, batch is acknowledged");
            metrics::SUBSCRIBER_ERRORS.with_label_values(&[name, "true"]).inc();
            inner.listeners.unexpected_subscription_error(&e);
        }

        if inner.cancel.is_cancelled() {
            debug!(subscription = %name, "cancelled before acknowledgment");
            return Ok(());
        }

        set_state(inner, WorkerState::Acknowledging);
        timeout(options.request_timeout(), connection.acknowledge(&change_vector))
            .await
            .map_err(|_| NetworkError::Timeout(options.request_timeout()))??;

        policy.on_batch_delivered();
        metrics::ACKNOWLEDGMENTS.with_label_values(&[name]).inc();
        inner.listeners.acknowledged(&AckInfo {
            subscription_name: name.to_string(),
            change_vector,
            items: batch.len(),
        });
        set_state(inner, WorkerState::Streaming);
    }
}

async fn connect(inner: &WorkerInner) -> Result<Box<dyn SubscriptionConnection>> {
    let options = &inner.options;
    let request = ConnectionRequest {
        database: inner.database.clone(),
        subscription_name: options.subscription_name().to_string(),
        worker_id: inner.worker_id.clone(),
        strategy: options.strategy(),
        max_docs_per_batch: options.max_docs_per_batch(),
        close_when_no_docs_left: options.close_when_no_docs_left(),
    };

    // A WaitForFree handshake lasts as long as the current holder stays
    if options.strategy() == SubscriptionOpeningStrategy::WaitForFree {
        return inner.transport.connect(request).await;
    }
    timeout(options.request_timeout(), inner.transport.connect(request))
        .await
        .map_err(|_| NetworkError::Timeout(options.request_timeout()))?
}

fn set_state(
    inner: &WorkerInner,
    state: WorkerState,
) {
    inner.state_tx.send_if_modified(|current| {
        if *current == state || current.is_terminal() {
            false
        } else {
            *current = state;
            true
        }
    });
}
