use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::utils::async_task::task_with_timeout_and_exponential_backoff;
use crate::BackoffPolicy;
use crate::EmbeddedServer;
use crate::Result;
use crate::SubscriptionCreationOptions;
use crate::SubscriptionOperations;
use crate::SubscriptionState;
use crate::SubscriptionTransport;
use crate::SubscriptionUpdateOptions;
use crate::SubscriptionWorker;
use crate::SubscriptionWorkerOptions;
use crate::SubscriptionsConfig;
use crate::WorkerConfig;

/// Subscription definitions and worker construction for one database
///
/// Every call targets the database the facade was created for. `get_state`
/// and `get_subscriptions` are retried on transient failures with the
/// `retry.operations` policy; mutating calls are issued once.
#[derive(Clone)]
pub struct DocumentSubscriptions {
    database: String,
    operations: Arc<dyn SubscriptionOperations>,
    transport: Arc<dyn SubscriptionTransport>,
    worker_defaults: WorkerConfig,
    retry: BackoffPolicy,
}

impl DocumentSubscriptions {
    pub fn new(
        database: impl Into<String>,
        operations: Arc<dyn SubscriptionOperations>,
        transport: Arc<dyn SubscriptionTransport>,
        config: SubscriptionsConfig,
    ) -> Self {
        Self {
            database: database.into(),
            operations,
            transport,
            worker_defaults: config.worker,
            retry: config.retry.operations,
        }
    }

    /// Facade over an in-process server, using default settings
    pub fn embedded(server: &EmbeddedServer) -> Self {
        let server = Arc::new(server.clone());
        Self::new(
            server.database().to_string(),
            server.clone(),
            server,
            SubscriptionsConfig::default(),
        )
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    /// Create a subscription and return its name
    ///
    /// Without an explicit name the server assigns one.
    pub async fn create(
        &self,
        options: SubscriptionCreationOptions,
    ) -> Result<String> {
        options.validate()?;
        let name = self.operations.create(&self.database, options).await?;
        debug!(subscription = %name, database = %self.database, "subscription created");
        Ok(name)
    }

    /// Shorthand for a subscription over every document of `collection`
    pub async fn create_for_collection(
        &self,
        collection: &str,
    ) -> Result<String> {
        self.create(SubscriptionCreationOptions::for_collection(collection))
            .await
    }

    pub async fn update(
        &self,
        options: SubscriptionUpdateOptions,
    ) -> Result<String> {
        options.validate()?;
        self.operations.update(&self.database, options).await
    }

    pub async fn delete(
        &self,
        name: &str,
    ) -> Result<()> {
        self.operations.delete(&self.database, name).await
    }

    pub async fn enable(
        &self,
        name: &str,
    ) -> Result<()> {
        self.operations.enable(&self.database, name).await
    }

    /// Disable the subscription; connected workers stop with `Ok(())`
    pub async fn disable(
        &self,
        name: &str,
    ) -> Result<()> {
        self.operations.disable(&self.database, name).await
    }

    pub async fn get_state(
        &self,
        name: &str,
    ) -> Result<SubscriptionState> {
        task_with_timeout_and_exponential_backoff(
            || self.operations.get_state(&self.database, name),
            self.retry,
        )
        .await
    }

    /// Page through the subscriptions of the database ordered by id
    pub async fn get_subscriptions(
        &self,
        start: usize,
        take: usize,
    ) -> Result<Vec<SubscriptionState>> {
        task_with_timeout_and_exponential_backoff(
            || self.operations.get_subscriptions(&self.database, start, take),
            self.retry,
        )
        .await
    }

    /// Close every active connection of the subscription
    ///
    /// Their workers stop with `Ok(())`; the subscription stays usable.
    pub async fn drop_connection(
        &self,
        name: &str,
    ) -> Result<()> {
        self.operations.drop_connection(&self.database, name).await
    }

    /// A worker with the given options; nothing connects until `run`
    pub fn get_subscription_worker<T>(
        &self,
        options: SubscriptionWorkerOptions,
    ) -> SubscriptionWorker<T>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        SubscriptionWorker::new(options, self.database.clone(), self.transport.clone())
    }

    /// A worker using the configured worker defaults
    pub fn get_subscription_worker_by_name<T>(
        &self,
        name: &str,
    ) -> SubscriptionWorker<T>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        let options = SubscriptionWorkerOptions::from_config(name, &self.worker_defaults);
        self.get_subscription_worker(options)
    }
}
