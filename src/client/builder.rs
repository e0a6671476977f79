use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;

use super::Client;
use super::ClientInner;
use super::ConnectionPool;
use super::DocumentSubscriptions;
use crate::utils::async_task::task_with_timeout_and_exponential_backoff;
use crate::GrpcSubscriptionOperations;
use crate::GrpcSubscriptionTransport;
use crate::Result;
use crate::SubscriptionsConfig;

pub struct ClientBuilder {
    config: SubscriptionsConfig,
    endpoints: Vec<String>,
}

impl ClientBuilder {
    /// Create a new builder with default config and specified endpoints
    pub fn new(endpoints: Vec<String>) -> Self {
        Self {
            config: SubscriptionsConfig::default(),
            endpoints,
        }
    }

    /// Database every subscription call targets (default: `default`)
    pub fn database(
        mut self,
        database: impl Into<String>,
    ) -> Self {
        self.config.connection.database = database.into();
        self
    }

    /// Set connection timeout (default: 1s)
    pub fn connect_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        self.config.connection.connect_timeout_in_ms = timeout.as_millis() as u64;
        self
    }

    /// Set request timeout (default: 3s)
    pub fn request_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        self.config.connection.request_timeout_in_ms = timeout.as_millis() as u64;
        self
    }

    /// Enable/disable compression (default: enabled)
    pub fn enable_compression(
        mut self,
        enable: bool,
    ) -> Self {
        self.config.connection.enable_compression = enable;
        self
    }

    /// Use TLS, trusting the CA certificate at `ca_path`
    pub fn enable_tls(
        mut self,
        ca_path: impl Into<String>,
    ) -> Self {
        self.config.tls.enable_tls = true;
        self.config.tls.certificate_authority_root_path = ca_path.into();
        self
    }

    /// Completely replaces the default configuration
    ///
    /// Settings made earlier through the individual methods are discarded.
    /// The endpoints given to [`Client::builder`] win over
    /// `connection.endpoints` unless they are empty.
    pub fn set_config(
        mut self,
        config: SubscriptionsConfig,
    ) -> Self {
        self.config = config;
        self
    }

    /// Validate the configuration and connect to the endpoints
    ///
    /// Connecting is retried with the `retry.connect` policy.
    pub async fn build(mut self) -> Result<Client> {
        if !self.endpoints.is_empty() {
            self.config.connection.endpoints = self.endpoints;
        }
        let config = self.config.validate()?;
        let endpoints = config.connection.endpoints.clone();

        let pool = task_with_timeout_and_exponential_backoff(
            || ConnectionPool::create(endpoints.clone(), &config),
            config.retry.connect,
        )
        .await?;

        let inner = Arc::new(ArcSwap::from_pointee(ClientInner { pool, config }));
        let config = inner.load().config.clone();
        let subscriptions = DocumentSubscriptions::new(
            config.connection.database.clone(),
            Arc::new(GrpcSubscriptionOperations::new(inner.clone())),
            Arc::new(GrpcSubscriptionTransport::new(inner.clone())),
            config,
        );

        Ok(Client { subscriptions, inner })
    }
}
