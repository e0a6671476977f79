//! Seams between the subscription client and a subscription server.
//!
//! Two collaborators are abstracted here:
//! - [`SubscriptionOperations`]: the request/response channel used for
//!   definition management.
//! - [`SubscriptionTransport`] / [`SubscriptionConnection`]: the streaming
//!   channel a worker opens to receive batches and send acknowledgments.
//!
//! The gRPC backend ([`grpc`]) and the in-process server
//! ([`EmbeddedServer`](crate::EmbeddedServer)) both implement them.

pub mod grpc;

#[cfg(test)]
use mockall::automock;
use tonic::async_trait;

use crate::ChangeVector;
use crate::CloseReason;
use crate::RawBatch;
use crate::Result;
use crate::SubscriptionCreationOptions;
use crate::SubscriptionOpeningStrategy;
use crate::SubscriptionState;
use crate::SubscriptionUpdateOptions;

/// Handshake sent when a worker opens a connection
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionRequest {
    pub database: String,
    pub subscription_name: String,
    /// Unique per worker instance, used for logging and server-side bookkeeping
    pub worker_id: String,
    pub strategy: SubscriptionOpeningStrategy,
    pub max_docs_per_batch: u32,
    /// Ask the server to close the connection once nothing is left to send
    pub close_when_no_docs_left: bool,
}

/// Frame received on an established subscription connection
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// Next batch; the server waits for its acknowledgment before sending more
    Batch(RawBatch),
    /// Keep-alive, nothing to process
    Heartbeat,
    /// The server closed the subscription for this connection
    Closed(CloseReason),
}

/// One established subscription connection
///
/// Dropping the connection releases the server-side slot.
#[async_trait]
pub trait SubscriptionConnection: Send {
    /// Wait for the next frame
    async fn next_message(&mut self) -> Result<ServerMessage>;

    /// Acknowledge the last delivered batch and wait for the server's confirmation
    async fn acknowledge(
        &mut self,
        change_vector: &ChangeVector,
    ) -> Result<()>;
}

/// Opens subscription connections
///
/// `connect` resolves once the server accepted the handshake. Under
/// `WaitForFree` that can take as long as the current holder stays connected.
#[async_trait]
pub trait SubscriptionTransport: Send + Sync + 'static {
    async fn connect(
        &self,
        request: ConnectionRequest,
    ) -> Result<Box<dyn SubscriptionConnection>>;
}

/// Definition management calls
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SubscriptionOperations: Send + Sync + 'static {
    /// Returns the name of the created subscription
    async fn create(
        &self,
        database: &str,
        options: SubscriptionCreationOptions,
    ) -> Result<String>;

    /// Returns the name of the updated (or created) subscription
    async fn update(
        &self,
        database: &str,
        options: SubscriptionUpdateOptions,
    ) -> Result<String>;

    async fn delete(
        &self,
        database: &str,
        name: &str,
    ) -> Result<()>;

    async fn enable(
        &self,
        database: &str,
        name: &str,
    ) -> Result<()>;

    async fn disable(
        &self,
        database: &str,
        name: &str,
    ) -> Result<()>;

    async fn get_state(
        &self,
        database: &str,
        name: &str,
    ) -> Result<SubscriptionState>;

    /// Page through subscriptions ordered by id
    async fn get_subscriptions(
        &self,
        database: &str,
        start: usize,
        take: usize,
    ) -> Result<Vec<SubscriptionState>>;

    /// Close every active connection of the subscription with `Dropped`
    async fn drop_connection(
        &self,
        database: &str,
        name: &str,
    ) -> Result<()>;
}
