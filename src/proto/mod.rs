//! Wire messages of the `docsub.SubscriptionService` gRPC service.
//!
//! ```text
//! service SubscriptionService {
//!   rpc Subscribe(stream ClientFrame) returns (stream ServerFrame);
//!   rpc Create(CreateSubscriptionRequest) returns (SubscriptionNameResponse);
//!   rpc Update(UpdateSubscriptionRequest) returns (SubscriptionNameResponse);
//!   rpc Delete(SubscriptionRequest) returns (Empty);
//!   rpc Enable(SubscriptionRequest) returns (Empty);
//!   rpc Disable(SubscriptionRequest) returns (Empty);
//!   rpc GetState(SubscriptionRequest) returns (SubscriptionStateMessage);
//!   rpc GetSubscriptions(GetSubscriptionsRequest) returns (GetSubscriptionsResponse);
//!   rpc DropConnection(SubscriptionRequest) returns (Empty);
//! }
//! ```
//!
//! Document bodies travel as JSON text.

use std::collections::HashMap;

pub const SERVICE_NAME: &str = "docsub.SubscriptionService";

// ---------------------------------------------------------------------------
// Streaming channel

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum OpeningStrategy {
    OpenIfFree = 0,
    TakeOver = 1,
    WaitForFree = 2,
    Concurrent = 3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum CloseReasonCode {
    Dropped = 0,
    Disabled = 1,
    Deleted = 2,
    TakenOver = 3,
    NoDocsLeft = 4,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum ConnectionStatusCode {
    Accepted = 0,
    InUse = 1,
    SubscriptionNotFound = 2,
    DatabaseNotFound = 3,
    Forbidden = 4,
    Closed = 5,
    Invalid = 6,
}

/// First client frame of a subscription stream
#[derive(Clone, PartialEq, prost::Message)]
pub struct Handshake {
    #[prost(string, tag = "1")]
    pub database: String,
    #[prost(string, tag = "2")]
    pub subscription_name: String,
    #[prost(string, tag = "3")]
    pub worker_id: String,
    #[prost(enumeration = "OpeningStrategy", tag = "4")]
    pub strategy: i32,
    #[prost(uint32, tag = "5")]
    pub max_docs_per_batch: u32,
    #[prost(bool, tag = "6")]
    pub close_when_no_docs_left: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Ack {
    /// Change vector of the last item of the acknowledged batch
    #[prost(string, tag = "1")]
    pub change_vector: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ClientFrame {
    #[prost(oneof = "client_frame::Frame", tags = "1, 2")]
    pub frame: Option<client_frame::Frame>,
}

pub mod client_frame {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Frame {
        #[prost(message, tag = "1")]
        Handshake(super::Handshake),
        #[prost(message, tag = "2")]
        Ack(super::Ack),
    }
}

/// Handshake outcome; under WaitForFree it arrives once the slot is granted
#[derive(Clone, PartialEq, prost::Message)]
pub struct ConnectionStatus {
    #[prost(enumeration = "ConnectionStatusCode", tag = "1")]
    pub code: i32,
    #[prost(string, tag = "2")]
    pub message: String,
    /// Set with `Closed`
    #[prost(enumeration = "CloseReasonCode", optional, tag = "3")]
    pub close_reason: Option<i32>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct BatchItem {
    #[prost(string, tag = "1")]
    pub key: String,
    #[prost(string, tag = "2")]
    pub change_vector: String,
    #[prost(string, tag = "3")]
    pub data_json: String,
    #[prost(string, tag = "4")]
    pub metadata_json: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CounterValues {
    #[prost(map = "string, int64", tag = "1")]
    pub values: HashMap<String, i64>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct TimeSeriesPoint {
    #[prost(uint64, tag = "1")]
    pub timestamp_ms: u64,
    #[prost(double, repeated, tag = "2")]
    pub values: Vec<f64>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct TimeSeriesPoints {
    #[prost(message, repeated, tag = "1")]
    pub points: Vec<TimeSeriesPoint>,
}

/// Time series of one document, by series name
#[derive(Clone, PartialEq, prost::Message)]
pub struct IncludedTimeSeries {
    #[prost(map = "string, message", tag = "1")]
    pub series: HashMap<String, TimeSeriesPoints>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Batch {
    #[prost(message, repeated, tag = "1")]
    pub items: Vec<BatchItem>,
    /// document key -> JSON body
    #[prost(map = "string, string", tag = "2")]
    pub included_documents: HashMap<String, String>,
    #[prost(map = "string, message", tag = "3")]
    pub included_counters: HashMap<String, CounterValues>,
    #[prost(map = "string, message", tag = "4")]
    pub included_time_series: HashMap<String, IncludedTimeSeries>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct AckConfirmed {
    #[prost(string, tag = "1")]
    pub change_vector: String,
    #[prost(bool, tag = "2")]
    pub accepted: bool,
    #[prost(string, tag = "3")]
    pub reason: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Heartbeat {}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Closed {
    #[prost(enumeration = "CloseReasonCode", tag = "1")]
    pub reason: i32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ServerFrame {
    #[prost(oneof = "server_frame::Frame", tags = "1, 2, 3, 4, 5")]
    pub frame: Option<server_frame::Frame>,
}

pub mod server_frame {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Frame {
        #[prost(message, tag = "1")]
        Status(super::ConnectionStatus),
        #[prost(message, tag = "2")]
        Batch(super::Batch),
        #[prost(message, tag = "3")]
        AckConfirmed(super::AckConfirmed),
        #[prost(message, tag = "4")]
        Heartbeat(super::Heartbeat),
        #[prost(message, tag = "5")]
        Closed(super::Closed),
    }
}

// ---------------------------------------------------------------------------
// Operation channel

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum ConnectionStatusKind {
    Open = 0,
    Closed = 1,
    Disabled = 2,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Empty {}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SubscriptionDefinition {
    #[prost(string, optional, tag = "1")]
    pub name: Option<String>,
    /// Final query, include clause included
    #[prost(string, optional, tag = "2")]
    pub query: Option<String>,
    /// `BeginningOfTime`, `LastDocument`, `DoNotChange` or a change vector
    #[prost(string, optional, tag = "3")]
    pub start_position: Option<String>,
    #[prost(string, optional, tag = "4")]
    pub mentor_node: Option<String>,
    #[prost(bool, tag = "5")]
    pub pin_to_mentor_node: bool,
    #[prost(bool, tag = "6")]
    pub disabled: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CreateSubscriptionRequest {
    #[prost(string, tag = "1")]
    pub database: String,
    #[prost(message, optional, tag = "2")]
    pub definition: Option<SubscriptionDefinition>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct UpdateSubscriptionRequest {
    #[prost(string, tag = "1")]
    pub database: String,
    #[prost(message, optional, tag = "2")]
    pub definition: Option<SubscriptionDefinition>,
    #[prost(uint64, optional, tag = "3")]
    pub key: Option<u64>,
    #[prost(bool, tag = "4")]
    pub create_new: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SubscriptionNameResponse {
    #[prost(string, tag = "1")]
    pub name: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SubscriptionRequest {
    #[prost(string, tag = "1")]
    pub database: String,
    #[prost(string, tag = "2")]
    pub name: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SubscriptionStateMessage {
    #[prost(uint64, tag = "1")]
    pub subscription_id: u64,
    #[prost(string, tag = "2")]
    pub subscription_name: String,
    #[prost(string, tag = "3")]
    pub query: String,
    /// Empty when nothing was acknowledged yet
    #[prost(string, tag = "4")]
    pub change_vector_for_next_batch_starting_point: String,
    #[prost(string, optional, tag = "5")]
    pub mentor_node: Option<String>,
    #[prost(string, optional, tag = "6")]
    pub node_tag: Option<String>,
    #[prost(bool, tag = "7")]
    pub disabled: bool,
    #[prost(enumeration = "ConnectionStatusKind", tag = "8")]
    pub connection_status: i32,
    /// Milliseconds since the Unix epoch
    #[prost(uint64, optional, tag = "9")]
    pub last_batch_ack_time_ms: Option<u64>,
    #[prost(uint64, optional, tag = "10")]
    pub last_client_connection_time_ms: Option<u64>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct GetSubscriptionsRequest {
    #[prost(string, tag = "1")]
    pub database: String,
    #[prost(uint64, tag = "2")]
    pub start: u64,
    #[prost(uint64, tag = "3")]
    pub take: u64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct GetSubscriptionsResponse {
    #[prost(message, repeated, tag = "1")]
    pub subscriptions: Vec<SubscriptionStateMessage>,
}
