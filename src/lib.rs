//! Document subscription workers.
//!
//! A subscription is a named, persistent, server-side query over a document
//! collection. A [`SubscriptionWorker`] connects to it, receives batches of
//! matching documents, hands each batch to user code and acknowledges it so
//! the server advances the subscription's checkpoint.
//!
//! Two server backends implement the same transport traits:
//! - [`Client`] talks to a remote server over gRPC
//! - [`EmbeddedServer`] keeps documents and subscriptions in process
//!
//! [`DocumentSubscriptions`] is the entry point for both.

mod client;
mod config;
mod embedded;
mod errors;
mod metrics;
mod network;
pub mod proto;
mod strategy;
mod subscription;
pub(crate) mod utils;
mod worker;

pub(crate) use client::ClientInner;
pub use client::*;
pub use config::*;
pub use embedded::*;
pub use errors::*;
pub use metrics::*;
pub use network::grpc::GrpcSubscriptionOperations;
pub use network::grpc::GrpcSubscriptionTransport;
pub use network::*;
pub use strategy::*;
pub use subscription::*;
pub use worker::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub(crate) mod test_utils;
