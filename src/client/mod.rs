//! Client side of a remote subscription server
//!
//! - [`Client`] - entry point holding the connection pool
//! - [`ClientBuilder`] - configurable client construction
//! - [`DocumentSubscriptions`] - definition management and worker construction
//! - [`ConnectionPool`] - underlying tonic channels
//!
//! # Basic Usage
//! ```no_run
//! use docsub::Client;
//! use docsub::SubscriptionBatch;
//! use std::time::Duration;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let client = Client::builder(vec!["http://127.0.0.1:9083".into()])
//!         .database("northwind")
//!         .connect_timeout(Duration::from_secs(3))
//!         .build()
//!         .await
//!         .unwrap();
//!
//!     let name = client
//!         .subscriptions()
//!         .create_for_collection("Orders")
//!         .await
//!         .unwrap();
//!
//!     let worker = client.subscriptions().get_subscription_worker_by_name::<serde_json::Value>(&name);
//!     let handle = worker
//!         .run(|batch: &SubscriptionBatch<serde_json::Value>| {
//!             for item in batch.items() {
//!                 println!("{}", item.key);
//!             }
//!             Ok::<(), std::io::Error>(())
//!         })
//!         .unwrap();
//!     handle.await.unwrap();
//! }
//! ```

mod builder;
mod pool;
mod subscriptions;

pub use builder::*;
pub use pool::*;
pub use subscriptions::*;


use std::sync::Arc;

use arc_swap::ArcSwap;
use tonic_health::pb::health_check_response::ServingStatus;
use tonic_health::pb::health_client::HealthClient;
use tonic_health::pb::HealthCheckRequest;
use tracing::debug;
use tracing::warn;

use crate::network::grpc::SubscriptionServiceClient;
use crate::proto::SERVICE_NAME;
use crate::NetworkError;
use crate::Result;
use crate::SubscriptionsConfig;

/// Main entry point for talking to a subscription server
///
/// Created through the [`builder()`](Client::builder) method. Cloning is
/// cheap; clones share the connection pool.
#[derive(Clone)]
pub struct Client {
    pub(super) subscriptions: DocumentSubscriptions,

    pub(super) inner: Arc<ArcSwap<ClientInner>>,
}

pub(crate) struct ClientInner {
    pub(super) pool: ConnectionPool,
    pub(super) config: SubscriptionsConfig,
}

impl ClientInner {
    pub(crate) fn service_client(&self) -> SubscriptionServiceClient {
        SubscriptionServiceClient::new(self.pool.channel(), self.config.connection.enable_compression)
    }
}

impl Client {
    /// Subscription definitions and workers
    ///
    /// # Examples
    /// ```rust,ignore
    /// client.subscriptions().delete("orders").await?;
    /// ```
    pub fn subscriptions(&self) -> &DocumentSubscriptions {
        &self.subscriptions
    }

    /// Create a configured client builder
    ///
    /// Chain configuration methods before calling
    /// [`build()`](ClientBuilder::build). An empty endpoint list falls back
    /// to `connection.endpoints`; `build` fails if both are empty.
    pub fn builder(endpoints: Vec<String>) -> ClientBuilder {
        ClientBuilder::new(endpoints)
    }

    /// Ask the server's health service whether the subscription service is
    /// serving
    pub async fn check_server_ready(&self) -> Result<()> {
        let channel = self.inner.load().pool.channel();
        let mut client = HealthClient::new(channel);
        let request = tonic::Request::new(HealthCheckRequest {
            service: SERVICE_NAME.to_string(),
        });

        let response = client.check(request).await?.into_inner();
        debug!(status = response.status, "health check");
        if response.status == ServingStatus::Serving as i32 {
            Ok(())
        } else {
            warn!("subscription service is not serving");
            Err(NetworkError::ServiceUnavailable(format!("{SERVICE_NAME} is not serving")).into())
        }
    }

    /// Rebuild the connection pool, optionally against new endpoints
    ///
    /// Workers and operation calls pick up the new channels on their next
    /// connection attempt.
    pub async fn refresh(
        &self,
        new_endpoints: Option<Vec<String>>,
    ) -> Result<()> {
        let old_inner = self.inner.load_full();
        let config = old_inner.config.clone();
        let endpoints = new_endpoints.unwrap_or_else(|| old_inner.pool.endpoints().to_vec());

        let pool = ConnectionPool::create(endpoints, &config).await?;
        self.inner.store(Arc::new(ClientInner { pool, config }));
        Ok(())
    }
}
