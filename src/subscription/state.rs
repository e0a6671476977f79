use std::fmt;
use std::time::SystemTime;

use serde::Deserialize;
use serde::Serialize;

use crate::ChangeVector;

/// Connection status reported in a [`SubscriptionState`] snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    /// At least one worker holds a connection
    Open,
    /// No worker is connected
    Closed,
    /// The subscription is disabled and refuses connections
    Disabled,
}

/// Why the server ended a subscription connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    /// `drop_connection` was issued for the subscription
    Dropped,
    /// The subscription was disabled
    Disabled,
    /// The subscription definition was deleted
    Deleted,
    /// A `TakeOver` worker displaced this connection
    TakenOver,
    /// No documents left and the worker asked to stop when idle
    NoDocsLeft,
}

impl CloseReason {
    /// Administrative closes complete a run cleanly
    ///
    /// A takeover is still reported to the displaced worker as an error.
    pub fn is_administrative(&self) -> bool {
        !matches!(self, CloseReason::TakenOver)
    }
}

impl fmt::Display for CloseReason {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let reason = match self {
            CloseReason::Dropped => "connection dropped by administrator",
            CloseReason::Disabled => "subscription disabled",
            CloseReason::Deleted => "subscription deleted",
            CloseReason::TakenOver => "connection taken over by another worker",
            CloseReason::NoDocsLeft => "no documents left to process",
        };
        f.write_str(reason)
    }
}

/// Read-only snapshot of a subscription as seen by the server
///
/// Fetched on demand through the operation channel and never cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionState {
    pub subscription_id: u64,
    pub subscription_name: String,
    pub query: String,
    /// Checkpoint: the next batch starts after this change vector
    pub change_vector_for_next_batch_starting_point: Option<ChangeVector>,
    pub mentor_node: Option<String>,
    /// Node currently responsible for the subscription
    pub node_tag: Option<String>,
    pub disabled: bool,
    pub connection_status: ConnectionStatus,
    pub last_batch_ack_time: Option<SystemTime>,
    pub last_client_connection_time: Option<SystemTime>,
}
