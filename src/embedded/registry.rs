use std::collections::VecDeque;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::sync::watch;
use tracing::debug;
use tracing::info;

use super::filter::SubscriptionFilter;
use crate::ChangeVector;
use crate::CloseReason;
use crate::ConnectionRequest;
use crate::ConnectionStatus;
use crate::Error;
use crate::Resolution;
use crate::Result;
use crate::SlotOccupancy;
use crate::StrategyResolver;
use crate::SubscriptionError;
use crate::SubscriptionOpeningStrategy;
use crate::SubscriptionState;

/// Server-side definition and progress of one subscription
#[derive(Debug, Clone)]
pub(crate) struct SubscriptionRecord {
    pub(crate) id: u64,
    pub(crate) name: String,
    pub(crate) query: String,
    pub(crate) filter: SubscriptionFilter,
    /// Highest acknowledged etag of this database
    pub(crate) checkpoint_etag: u64,
    pub(crate) checkpoint_cv: Option<ChangeVector>,
    /// Bumped on every progress reset; open connections rewind to the checkpoint
    pub(crate) progress_epoch: u64,
    pub(crate) mentor_node: Option<String>,
    pub(crate) disabled: bool,
    pub(crate) last_batch_ack_time: Option<SystemTime>,
    pub(crate) last_client_connection_time: Option<SystemTime>,
}

struct Holder {
    connection_id: u64,
    worker_id: String,
    strategy: SubscriptionOpeningStrategy,
    close_tx: watch::Sender<Option<CloseReason>>,
}

struct Waiter {
    connection_id: u64,
    worker_id: String,
    grant: oneshot::Sender<Result<SlotLease>>,
}

/// Active connections and the WaitForFree queue
#[derive(Default)]
struct Slot {
    holders: Vec<Holder>,
    waiters: VecDeque<Waiter>,
}

impl Slot {
    fn occupancy(&self) -> SlotOccupancy {
        match self.holders.first() {
            None => SlotOccupancy::Free,
            Some(h) if h.strategy == SubscriptionOpeningStrategy::Concurrent => SlotOccupancy::Concurrent {
                holders: self.holders.len(),
            },
            Some(h) => SlotOccupancy::Exclusive { strategy: h.strategy },
        }
    }

    fn close_holders(
        &mut self,
        reason: CloseReason,
    ) {
        for holder in self.holders.drain(..) {
            debug!(connection_id = holder.connection_id, worker_id = %holder.worker_id, %reason, "closing connection");
            holder.close_tx.send_replace(Some(reason));
        }
    }
}

/// Outcome of a connection attempt
pub(crate) enum Admission {
    Granted(SlotLease),
    /// Queued under WaitForFree; resolves once the slot is handed over
    Queued(oneshot::Receiver<Result<SlotLease>>),
}

/// One subscription in the embedded registry
pub(crate) struct SubscriptionEntry {
    record: Mutex<SubscriptionRecord>,
    slot: Mutex<Slot>,
    releases: AtomicUsize,
    progress_tx: watch::Sender<u64>,
}

impl SubscriptionEntry {
    pub(crate) fn new(record: SubscriptionRecord) -> Arc<Self> {
        let (progress_tx, _) = watch::channel(record.progress_epoch);
        Arc::new(Self {
            record: Mutex::new(record),
            slot: Mutex::new(Slot::default()),
            releases: AtomicUsize::new(0),
            progress_tx,
        })
    }

    pub(crate) fn record(&self) -> SubscriptionRecord {
        self.record.lock().clone()
    }

    pub(crate) fn update_record<R>(
        &self,
        f: impl FnOnce(&mut SubscriptionRecord) -> R,
    ) -> R {
        f(&mut self.record.lock())
    }

    /// Move the checkpoint to a new start position
    ///
    /// Open connections drop their own cursor and continue from the new
    /// checkpoint; acknowledgments of batches sent before the reset are
    /// not applied.
    pub(crate) fn reset_progress(
        &self,
        checkpoint_etag: u64,
        checkpoint_cv: Option<ChangeVector>,
    ) {
        let epoch = {
            let mut record = self.record.lock();
            record.checkpoint_etag = checkpoint_etag;
            record.checkpoint_cv = checkpoint_cv;
            record.progress_epoch += 1;
            record.progress_epoch
        };
        self.progress_tx.send_replace(epoch);
    }

    /// Notified with the new epoch whenever progress is reset
    pub(crate) fn watch_progress(&self) -> watch::Receiver<u64> {
        self.progress_tx.subscribe()
    }

    pub(crate) fn name(&self) -> String {
        self.record.lock().name.clone()
    }

    pub(crate) fn active_connections(&self) -> usize {
        self.slot.lock().holders.len()
    }

    pub(crate) fn released_connections(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub(crate) fn state(
        &self,
        node_tag: &str,
    ) -> SubscriptionState {
        let open = !self.slot.lock().holders.is_empty();
        let record = self.record.lock();
        let connection_status = if record.disabled {
            ConnectionStatus::Disabled
        } else if open {
            ConnectionStatus::Open
        } else {
            ConnectionStatus::Closed
        };
        SubscriptionState {
            subscription_id: record.id,
            subscription_name: record.name.clone(),
            query: record.query.clone(),
            change_vector_for_next_batch_starting_point: record.checkpoint_cv.clone(),
            mentor_node: record.mentor_node.clone(),
            node_tag: Some(node_tag.to_string()),
            disabled: record.disabled,
            connection_status,
            last_batch_ack_time: record.last_batch_ack_time,
            last_client_connection_time: record.last_client_connection_time,
        }
    }

    /// Arbitrate a new connection against the current holders
    pub(crate) fn admit(
        self: &Arc<Self>,
        connection_id: u64,
        request: &ConnectionRequest,
    ) -> Result<Admission> {
        let mut slot = self.slot.lock();
        // lock order: slot, then record
        let name = {
            let record = self.record.lock();
            if record.disabled {
                return Err(SubscriptionError::Closed {
                    name: record.name.clone(),
                    reason: CloseReason::Disabled,
                }
                .into());
            }
            record.name.clone()
        };

        let occupancy = slot.occupancy();
        let resolution = StrategyResolver::resolve(request.strategy, &occupancy);
        debug!(
            subscription = %name,
            worker_id = %request.worker_id,
            strategy = %request.strategy,
            ?occupancy,
            ?resolution,
            "connection arbitration"
        );

        match resolution {
            Resolution::Acquire | Resolution::Join => {
                Ok(Admission::Granted(self.hold(&mut slot, connection_id, &request.worker_id, request.strategy)))
            }
            Resolution::Evict => {
                info!(subscription = %name, worker_id = %request.worker_id, "taking over subscription");
                slot.close_holders(CloseReason::TakenOver);
                Ok(Admission::Granted(self.hold(&mut slot, connection_id, &request.worker_id, request.strategy)))
            }
            Resolution::Reject => Err(SubscriptionError::InUse { name }.into()),
            Resolution::Wait => {
                let (grant, granted) = oneshot::channel();
                slot.waiters.push_back(Waiter {
                    connection_id,
                    worker_id: request.worker_id.clone(),
                    grant,
                });
                debug!(subscription = %name, waiters = slot.waiters.len(), "connection queued");
                Ok(Admission::Queued(granted))
            }
        }
    }

    /// Close every holder; the slot is then handed to the next waiter
    pub(crate) fn drop_connections(self: &Arc<Self>) {
        let grant = {
            let mut slot = self.slot.lock();
            slot.close_holders(CloseReason::Dropped);
            self.next_waiter(&mut slot)
        };
        deliver(grant);
    }

    /// Mark disabled, close holders and fail waiters
    pub(crate) fn disable(&self) {
        let waiters = {
            let mut slot = self.slot.lock();
            self.record.lock().disabled = true;
            slot.close_holders(CloseReason::Disabled);
            slot.waiters.drain(..).collect::<Vec<_>>()
        };
        self.fail_waiters(waiters, CloseReason::Disabled);
    }

    pub(crate) fn enable(&self) {
        self.record.lock().disabled = false;
    }

    /// The definition is gone: close holders and fail waiters
    pub(crate) fn delete(&self) {
        let waiters = {
            let mut slot = self.slot.lock();
            slot.close_holders(CloseReason::Deleted);
            slot.waiters.drain(..).collect::<Vec<_>>()
        };
        self.fail_waiters(waiters, CloseReason::Deleted);
    }

    fn fail_waiters(
        &self,
        waiters: Vec<Waiter>,
        reason: CloseReason,
    ) {
        let name = self.name();
        for waiter in waiters {
            let error: Error = SubscriptionError::Closed {
                name: name.clone(),
                reason,
            }
            .into();
            let _ = waiter.grant.send(Err(error));
        }
    }

    fn release(
        self: &Arc<Self>,
        connection_id: u64,
    ) {
        let grant = {
            let mut slot = self.slot.lock();
            slot.holders.retain(|h| h.connection_id != connection_id);
            if slot.holders.is_empty() {
                self.next_waiter(&mut slot)
            } else {
                None
            }
        };
        deliver(grant);
    }

    /// Move the oldest live waiter into the slot
    ///
    /// Must be called with the slot locked; the grant is sent after unlocking.
    fn next_waiter(
        self: &Arc<Self>,
        slot: &mut Slot,
    ) -> Option<(oneshot::Sender<Result<SlotLease>>, SlotLease)> {
        if !slot.holders.is_empty() {
            return None;
        }
        while let Some(waiter) = slot.waiters.pop_front() {
            if waiter.grant.is_closed() {
                continue;
            }
            debug!(connection_id = waiter.connection_id, worker_id = %waiter.worker_id, "granting slot to waiter");
            let lease = self.hold(
                slot,
                waiter.connection_id,
                &waiter.worker_id,
                SubscriptionOpeningStrategy::WaitForFree,
            );
            return Some((waiter.grant, lease));
        }
        None
    }

    fn hold(
        self: &Arc<Self>,
        slot: &mut Slot,
        connection_id: u64,
        worker_id: &str,
        strategy: SubscriptionOpeningStrategy,
    ) -> SlotLease {
        let (close_tx, close_rx) = watch::channel(None);
        slot.holders.push(Holder {
            connection_id,
            worker_id: worker_id.to_string(),
            strategy,
            close_tx,
        });
        self.record.lock().last_client_connection_time = Some(SystemTime::now());
        SlotLease {
            entry: self.clone(),
            connection_id,
            close_rx,
        }
    }
}

/// Hand a freed slot to a waiter outside the slot lock
///
/// A waiter that gave up in the meantime drops the lease, which releases the
/// slot again and moves on to the next one.
fn deliver(grant: Option<(oneshot::Sender<Result<SlotLease>>, SlotLease)>) {
    if let Some((sender, lease)) = grant {
        if let Err(unclaimed) = sender.send(Ok(lease)) {
            drop(unclaimed);
        }
    }
}

/// Ownership of one holder position in a subscription slot
///
/// Dropping the lease releases the position exactly once.
pub(crate) struct SlotLease {
    entry: Arc<SubscriptionEntry>,
    connection_id: u64,
    close_rx: watch::Receiver<Option<CloseReason>>,
}

impl SlotLease {
    pub(crate) fn entry(&self) -> &Arc<SubscriptionEntry> {
        &self.entry
    }

    pub(crate) fn connection_id(&self) -> u64 {
        self.connection_id
    }

    /// Reason the server closed this connection, if it did
    pub(crate) fn close_reason(&self) -> Option<CloseReason> {
        *self.close_rx.borrow()
    }

    /// Resolves when the server closes this connection
    pub(crate) async fn closed(&mut self) -> CloseReason {
        loop {
            if let Some(reason) = *self.close_rx.borrow_and_update() {
                return reason;
            }
            if self.close_rx.changed().await.is_err() {
                return self.close_reason().unwrap_or(CloseReason::Dropped);
            }
        }
    }
}

impl Drop for SlotLease {
    fn drop(&mut self) {
        self.entry.releases.fetch_add(1, Ordering::SeqCst);
        self.entry.release(self.connection_id);
    }
}
