use std::sync::Arc;

use arc_swap::ArcSwap;
use tonic::async_trait;
use tracing::debug;

use super::service_client::SubscriptionServiceClient;
use crate::proto;
use crate::utils::scoped_timer::ScopedTimer;
use crate::ClientInner;
use crate::Result;
use crate::SubscriptionCreationOptions;
use crate::SubscriptionOperations;
use crate::SubscriptionState;
use crate::SubscriptionUpdateOptions;

/// Definition management over unary `docsub.SubscriptionService` calls
#[derive(Clone)]
pub struct GrpcSubscriptionOperations {
    client_inner: Arc<ArcSwap<ClientInner>>,
}

impl GrpcSubscriptionOperations {
    pub(crate) fn new(client_inner: Arc<ArcSwap<ClientInner>>) -> Self {
        Self { client_inner }
    }

    /// The guard on the shared client state is released before any await
    fn service_client(&self) -> SubscriptionServiceClient {
        self.client_inner.load().service_client()
    }

    fn name_request(
        database: &str,
        name: &str,
    ) -> proto::SubscriptionRequest {
        proto::SubscriptionRequest {
            database: database.to_string(),
            name: name.to_string(),
        }
    }
}

/// Render the include clause into the query before it goes on the wire
fn definition(options: &SubscriptionCreationOptions) -> Result<proto::SubscriptionDefinition> {
    let mut definition = proto::SubscriptionDefinition::from(options);
    if options.query.is_some() {
        definition.query = Some(options.to_query()?);
    }
    Ok(definition)
}

#[async_trait]
impl SubscriptionOperations for GrpcSubscriptionOperations {
    async fn create(
        &self,
        database: &str,
        options: SubscriptionCreationOptions,
    ) -> Result<String> {
        let _timer = ScopedTimer::new("subscriptions::create");
        let request = proto::CreateSubscriptionRequest {
            database: database.to_string(),
            definition: Some(definition(&options)?),
        };
        let response = self.service_client().create(request).await?;
        let name = response.into_inner().name;
        debug!(subscription = %name, "created");
        Ok(name)
    }

    async fn update(
        &self,
        database: &str,
        options: SubscriptionUpdateOptions,
    ) -> Result<String> {
        let _timer = ScopedTimer::new("subscriptions::update");
        let request = proto::UpdateSubscriptionRequest {
            database: database.to_string(),
            definition: Some(definition(&options.options)?),
            key: options.key,
            create_new: options.create_new,
        };
        let response = self.service_client().update(request).await?;
        Ok(response.into_inner().name)
    }

    async fn delete(
        &self,
        database: &str,
        name: &str,
    ) -> Result<()> {
        self.service_client()
            .delete(Self::name_request(database, name))
            .await?;
        Ok(())
    }

    async fn enable(
        &self,
        database: &str,
        name: &str,
    ) -> Result<()> {
        self.service_client()
            .enable(Self::name_request(database, name))
            .await?;
        Ok(())
    }

    async fn disable(
        &self,
        database: &str,
        name: &str,
    ) -> Result<()> {
        self.service_client()
            .disable(Self::name_request(database, name))
            .await?;
        Ok(())
    }

    async fn get_state(
        &self,
        database: &str,
        name: &str,
    ) -> Result<SubscriptionState> {
        let _timer = ScopedTimer::new("subscriptions::get_state");
        let response = self
            .service_client()
            .get_state(Self::name_request(database, name))
            .await?;
        SubscriptionState::try_from(response.into_inner())
    }

    async fn get_subscriptions(
        &self,
        database: &str,
        start: usize,
        take: usize,
    ) -> Result<Vec<SubscriptionState>> {
        let request = proto::GetSubscriptionsRequest {
            database: database.to_string(),
            start: start as u64,
            take: take as u64,
        };
        let response = self
            .service_client()
            .get_subscriptions(request)
            .await?;
        response
            .into_inner()
            .subscriptions
            .into_iter()
            .map(SubscriptionState::try_from)
            .collect()
    }

    async fn drop_connection(
        &self,
        database: &str,
        name: &str,
    ) -> Result<()> {
        self.service_client()
            .drop_connection(Self::name_request(database, name))
            .await?;
        Ok(())
    }
}
