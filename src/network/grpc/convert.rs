//! Conversions between wire messages and the subscription model.

use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use crate::proto;
use crate::ChangeVector;
use crate::CloseReason;
use crate::ConnectionRequest;
use crate::ConnectionStatus;
use crate::Error;
use crate::ProtocolError;
use crate::RawBatch;
use crate::RawBatchItem;
use crate::Result;
use crate::SubscriptionCreationOptions;
use crate::SubscriptionError;
use crate::SubscriptionOpeningStrategy;
use crate::SubscriptionState;
use crate::TimeSeriesEntry;

impl From<SubscriptionOpeningStrategy> for proto::OpeningStrategy {
    fn from(strategy: SubscriptionOpeningStrategy) -> Self {
        match strategy {
            SubscriptionOpeningStrategy::OpenIfFree => proto::OpeningStrategy::OpenIfFree,
            SubscriptionOpeningStrategy::TakeOver => proto::OpeningStrategy::TakeOver,
            SubscriptionOpeningStrategy::WaitForFree => proto::OpeningStrategy::WaitForFree,
            SubscriptionOpeningStrategy::Concurrent => proto::OpeningStrategy::Concurrent,
        }
    }
}

impl From<proto::CloseReasonCode> for CloseReason {
    fn from(code: proto::CloseReasonCode) -> Self {
        match code {
            proto::CloseReasonCode::Dropped => CloseReason::Dropped,
            proto::CloseReasonCode::Disabled => CloseReason::Disabled,
            proto::CloseReasonCode::Deleted => CloseReason::Deleted,
            proto::CloseReasonCode::TakenOver => CloseReason::TakenOver,
            proto::CloseReasonCode::NoDocsLeft => CloseReason::NoDocsLeft,
        }
    }
}

impl From<CloseReason> for proto::CloseReasonCode {
    fn from(reason: CloseReason) -> Self {
        match reason {
            CloseReason::Dropped => proto::CloseReasonCode::Dropped,
            CloseReason::Disabled => proto::CloseReasonCode::Disabled,
            CloseReason::Deleted => proto::CloseReasonCode::Deleted,
            CloseReason::TakenOver => proto::CloseReasonCode::TakenOver,
            CloseReason::NoDocsLeft => proto::CloseReasonCode::NoDocsLeft,
        }
    }
}

pub(crate) fn close_reason(code: i32) -> Result<CloseReason> {
    proto::CloseReasonCode::try_from(code)
        .map(CloseReason::from)
        .map_err(|_| ProtocolError::InvalidResponse(format!("unknown close reason {code}")).into())
}

impl proto::ClientFrame {
    pub(crate) fn handshake(request: &ConnectionRequest) -> Self {
        Self {
            frame: Some(proto::client_frame::Frame::Handshake(proto::Handshake {
                database: request.database.clone(),
                subscription_name: request.subscription_name.clone(),
                worker_id: request.worker_id.clone(),
                strategy: proto::OpeningStrategy::from(request.strategy) as i32,
                max_docs_per_batch: request.max_docs_per_batch,
                close_when_no_docs_left: request.close_when_no_docs_left,
            })),
        }
    }

    pub(crate) fn ack(change_vector: &ChangeVector) -> Self {
        Self {
            frame: Some(proto::client_frame::Frame::Ack(proto::Ack {
                change_vector: change_vector.to_string(),
            })),
        }
    }
}

impl proto::ConnectionStatus {
    /// `Ok` when the server accepted the handshake
    pub(crate) fn into_result(
        self,
        request: &ConnectionRequest,
    ) -> Result<()> {
        let name = request.subscription_name.clone();
        let code = proto::ConnectionStatusCode::try_from(self.code)
            .map_err(|_| ProtocolError::InvalidResponse(format!("unknown connection status {}", self.code)))?;

        let error: Error = match code {
            proto::ConnectionStatusCode::Accepted => return Ok(()),
            proto::ConnectionStatusCode::InUse => SubscriptionError::InUse { name }.into(),
            proto::ConnectionStatusCode::SubscriptionNotFound => {
                SubscriptionError::SubscriptionDoesNotExist { name }.into()
            }
            proto::ConnectionStatusCode::DatabaseNotFound => SubscriptionError::DatabaseDoesNotExist {
                database: request.database.clone(),
            }
            .into(),
            proto::ConnectionStatusCode::Forbidden => SubscriptionError::Authorization(self.message).into(),
            proto::ConnectionStatusCode::Closed => {
                let reason = match self.close_reason {
                    Some(code) => close_reason(code)?,
                    None => CloseReason::Dropped,
                };
                SubscriptionError::Closed { name, reason }.into()
            }
            proto::ConnectionStatusCode::Invalid => SubscriptionError::InvalidState {
                name,
                reason: self.message,
            }
            .into(),
        };
        Err(error)
    }
}

impl TryFrom<proto::Batch> for RawBatch {
    type Error = Error;

    fn try_from(batch: proto::Batch) -> Result<Self> {
        let items = batch
            .items
            .into_iter()
            .map(|item| -> Result<RawBatchItem> {
                let change_vector = ChangeVector::parse(item.change_vector)?;
                let data = parse_json(&item.key, &item.data_json)?;
                let metadata = match item.metadata_json.is_empty() {
                    true => serde_json::Value::Null,
                    false => parse_json(&item.key, &item.metadata_json)?,
                };
                Ok(RawBatchItem {
                    key: item.key,
                    change_vector,
                    data,
                    metadata,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let included_documents = batch
            .included_documents
            .into_iter()
            .map(|(key, json)| parse_json(&key, &json).map(|value| (key, value)))
            .collect::<Result<_>>()?;

        let included_counters = batch
            .included_counters
            .into_iter()
            .map(|(key, counters)| (key, counters.values))
            .collect();

        let included_time_series = batch
            .included_time_series
            .into_iter()
            .map(|(key, included)| {
                let series = included
                    .series
                    .into_iter()
                    .map(|(name, points)| {
                        let entries = points
                            .points
                            .into_iter()
                            .map(|point| TimeSeriesEntry {
                                timestamp: from_unix_millis(point.timestamp_ms),
                                values: point.values,
                            })
                            .collect();
                        (name, entries)
                    })
                    .collect();
                (key, series)
            })
            .collect();

        Ok(RawBatch {
            items,
            included_documents,
            included_counters,
            included_time_series,
        })
    }
}

fn parse_json(
    key: &str,
    json: &str,
) -> Result<serde_json::Value> {
    serde_json::from_str(json).map_err(|source| {
        ProtocolError::DocumentDecode {
            key: key.to_string(),
            source,
        }
        .into()
    })
}

impl From<&SubscriptionCreationOptions> for proto::SubscriptionDefinition {
    /// The query is expected to be rendered already (include clause appended)
    fn from(options: &SubscriptionCreationOptions) -> Self {
        Self {
            name: options.name.clone(),
            query: options.query.clone(),
            start_position: options.change_vector.as_ref().map(|p| p.to_wire()),
            mentor_node: options.mentor_node.clone(),
            pin_to_mentor_node: options.pin_to_mentor_node,
            disabled: options.disabled,
        }
    }
}

impl TryFrom<proto::SubscriptionStateMessage> for SubscriptionState {
    type Error = Error;

    fn try_from(state: proto::SubscriptionStateMessage) -> Result<Self> {
        let change_vector = match state.change_vector_for_next_batch_starting_point.is_empty() {
            true => None,
            false => Some(ChangeVector::parse(state.change_vector_for_next_batch_starting_point)?),
        };
        let connection_status = match proto::ConnectionStatusKind::try_from(state.connection_status) {
            Ok(proto::ConnectionStatusKind::Open) => ConnectionStatus::Open,
            Ok(proto::ConnectionStatusKind::Closed) => ConnectionStatus::Closed,
            Ok(proto::ConnectionStatusKind::Disabled) => ConnectionStatus::Disabled,
            Err(_) => {
                return Err(ProtocolError::InvalidResponse(format!(
                    "unknown connection status {}",
                    state.connection_status
                ))
                .into())
            }
        };

        Ok(SubscriptionState {
            subscription_id: state.subscription_id,
            subscription_name: state.subscription_name,
            query: state.query,
            change_vector_for_next_batch_starting_point: change_vector,
            mentor_node: state.mentor_node,
            node_tag: state.node_tag,
            disabled: state.disabled,
            connection_status,
            last_batch_ack_time: state.last_batch_ack_time_ms.map(from_unix_millis),
            last_client_connection_time: state.last_client_connection_time_ms.map(from_unix_millis),
        })
    }
}

fn from_unix_millis(ms: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(ms)
}
