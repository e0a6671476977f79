use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use std::time::SystemTime;

use serde_json::json;
use tokio::sync::watch;
use tokio::time::sleep;
use tonic::async_trait;
use tracing::debug;

use super::registry::SlotLease;
use super::server::ServerInner;
use crate::ChangeVector;
use crate::CloseReason;
use crate::NetworkError;
use crate::ProtocolError;
use crate::RawBatch;
use crate::RawBatchItem;
use crate::Result;
use crate::ServerMessage;
use crate::SubscriptionConnection;
use crate::SubscriptionError;

/// Documents read from the store per scan step
const SCAN_PAGE: usize = 256;

/// Batch waiting for its acknowledgment
struct InFlight {
    /// Etag of the last document scanned to build the batch
    scanned_etag: u64,
    change_vector: ChangeVector,
    /// Progress epoch the batch was built in
    epoch: u64,
}

/// Server end of one embedded subscription connection
///
/// Each connection keeps its own cursor, starting at the subscription
/// checkpoint. Acknowledgments advance both the cursor and the shared
/// checkpoint, which only moves forward until an update resets it. After a
/// reset the cursor rewinds to the new checkpoint.
pub(crate) struct EmbeddedConnection {
    server: Arc<ServerInner>,
    lease: SlotLease,
    subscription_name: String,
    cursor: u64,
    epoch: u64,
    in_flight: Option<InFlight>,
    max_docs: usize,
    close_when_no_docs_left: bool,
    heartbeat_interval: Duration,
    documents_rx: watch::Receiver<u64>,
    progress_rx: watch::Receiver<u64>,
}

impl EmbeddedConnection {
    pub(crate) fn new(
        server: Arc<ServerInner>,
        lease: SlotLease,
        max_docs_per_batch: u32,
        close_when_no_docs_left: bool,
    ) -> Self {
        let record = lease.entry().record();
        let documents_rx = server.documents.subscribe();
        let progress_rx = lease.entry().watch_progress();
        let heartbeat_interval = server.heartbeat_interval();
        Self {
            server,
            lease,
            subscription_name: record.name,
            cursor: record.checkpoint_etag,
            epoch: record.progress_epoch,
            in_flight: None,
            max_docs: max_docs_per_batch.max(1) as usize,
            close_when_no_docs_left,
            heartbeat_interval,
            documents_rx,
            progress_rx,
        }
    }

    /// Collect up to `max_docs` matching documents after the cursor
    fn next_batch(&mut self) -> Option<RawBatch> {
        let record = self.lease.entry().record();
        if record.progress_epoch != self.epoch {
            debug!(
                subscription = %self.subscription_name,
                connection_id = self.lease.connection_id(),
                checkpoint_etag = record.checkpoint_etag,
                "progress reset, rewinding cursor"
            );
            self.epoch = record.progress_epoch;
            self.cursor = record.checkpoint_etag;
        }
        let filter = record.filter;
        let includes = filter.includes();

        let mut batch = RawBatch::default();
        let mut scanned = self.cursor;

        'scan: loop {
            let page = self.server.documents.scan_after(scanned, SCAN_PAGE);
            if page.is_empty() {
                break;
            }
            for doc in page {
                scanned = doc.etag;
                if !filter.matches(&doc) {
                    continue;
                }

                for key in includes.document_keys(&doc) {
                    if let Some(related) = self.server.documents.get(&key) {
                        batch.included_documents.insert(key, related.data);
                    }
                }
                if let Some(counters) = includes.counters_of(&doc) {
                    batch.included_counters.insert(doc.key.clone(), counters);
                }
                if let Some(series) = includes.time_series_of(&doc) {
                    batch.included_time_series.insert(doc.key.clone(), series);
                }

                batch.items.push(RawBatchItem {
                    metadata: json!({
                        "@id": doc.key,
                        "@collection": doc.collection,
                        "@change-vector": doc.change_vector.as_str(),
                    }),
                    key: doc.key,
                    change_vector: doc.change_vector,
                    data: doc.data,
                });
                if batch.items.len() >= self.max_docs {
                    break 'scan;
                }
            }
        }

        let Some(change_vector) = batch.last_change_vector().cloned() else {
            // Nothing matched; skip the scanned range for this connection
            self.cursor = scanned;
            return None;
        };
        self.in_flight = Some(InFlight {
            scanned_etag: scanned,
            change_vector,
            epoch: self.epoch,
        });
        Some(batch)
    }

    fn closed_error(
        &self,
        reason: CloseReason,
    ) -> crate::Error {
        SubscriptionError::Closed {
            name: self.subscription_name.clone(),
            reason,
        }
        .into()
    }
}

#[async_trait]
impl SubscriptionConnection for EmbeddedConnection {
    async fn next_message(&mut self) -> Result<ServerMessage> {
        if self.in_flight.is_some() {
            return Err(ProtocolError::UnexpectedFrame {
                expected: "Ack",
                actual: "request for the next batch".to_string(),
            }
            .into());
        }

        loop {
            if let Some(reason) = self.lease.close_reason() {
                return Ok(ServerMessage::Closed(reason));
            }

            // Mark the current store version and progress as seen before scanning
            self.documents_rx.borrow_and_update();
            self.progress_rx.borrow_and_update();
            if let Some(batch) = self.next_batch() {
                debug!(
                    subscription = %self.subscription_name,
                    connection_id = self.lease.connection_id(),
                    items = batch.items.len(),
                    "sending batch"
                );
                return Ok(ServerMessage::Batch(batch));
            }
            if self.close_when_no_docs_left {
                return Ok(ServerMessage::Closed(CloseReason::NoDocsLeft));
            }

            tokio::select! {
                reason = self.lease.closed() => return Ok(ServerMessage::Closed(reason)),
                changed = self.documents_rx.changed() => {
                    if changed.is_err() {
                        return Err(NetworkError::ConnectionLost("embedded server shut down".into()).into());
                    }
                }
                _ = self.progress_rx.changed() => {}
                _ = sleep(self.heartbeat_interval) => return Ok(ServerMessage::Heartbeat),
            }
        }
    }

    async fn acknowledge(
        &mut self,
        change_vector: &ChangeVector,
    ) -> Result<()> {
        let Some(in_flight) = self.in_flight.take() else {
            return Err(NetworkError::AckRejected {
                change_vector: change_vector.to_string(),
                reason: "no batch is waiting for an acknowledgment".into(),
            }
            .into());
        };
        if in_flight.change_vector != *change_vector {
            return Err(NetworkError::AckRejected {
                change_vector: change_vector.to_string(),
                reason: format!("expected '{}'", in_flight.change_vector),
            }
            .into());
        }
        // A connection closed by the server no longer moves the checkpoint
        if let Some(reason) = self.lease.close_reason() {
            return Err(self.closed_error(reason));
        }

        let applied = self.lease.entry().update_record(|record| {
            record.last_batch_ack_time = Some(SystemTime::now());
            // Progress was reset while the batch was out
            if record.progress_epoch != in_flight.epoch {
                return false;
            }
            record.checkpoint_etag = record.checkpoint_etag.max(in_flight.scanned_etag);
            record.checkpoint_cv = Some(match &record.checkpoint_cv {
                Some(current) => current.merge(change_vector),
                None => change_vector.clone(),
            });
            true
        });
        if applied {
            self.cursor = in_flight.scanned_etag;
            debug!(subscription = %self.subscription_name, %change_vector, "acknowledged");
        } else {
            debug!(subscription = %self.subscription_name, %change_vector, "acknowledged before a progress reset, checkpoint kept");
        }
        Ok(())
    }
}
