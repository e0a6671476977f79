//! gRPC backend for a remote subscription server.
//!
//! [`GrpcSubscriptionTransport`] drives the bidirectional `Subscribe` stream
//! (client: `Handshake`, then `Ack`; server: `ConnectionStatus`, then
//! `Batch` / `AckConfirmed`, with `Heartbeat` and `Closed` at any time).
//! [`GrpcSubscriptionOperations`] issues the unary definition calls.

mod convert;
mod operations;
mod service_client;
mod transport;

pub use operations::GrpcSubscriptionOperations;
pub(crate) use service_client::SubscriptionServiceClient;
pub use transport::GrpcSubscriptionTransport;
