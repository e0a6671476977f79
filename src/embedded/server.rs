use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use std::time::SystemTime;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use tonic::async_trait;
use tracing::debug;
use tracing::info;

use super::connection::EmbeddedConnection;
use super::documents::DocumentStore;
use super::filter::SubscriptionFilter;
use super::registry::Admission;
use super::registry::SubscriptionEntry;
use super::registry::SubscriptionRecord;
use super::StoredDocument;
use crate::ChangeVector;
use crate::ConnectionRequest;
use crate::NetworkError;
use crate::Result;
use crate::SubscriptionConnection;
use crate::SubscriptionCreationOptions;
use crate::SubscriptionError;
use crate::SubscriptionOperations;
use crate::SubscriptionStartPosition;
use crate::SubscriptionState;
use crate::SubscriptionTransport;
use crate::SubscriptionUpdateOptions;

const NODE_TAG: &str = "A";
const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// In-process subscription server
///
/// Holds one database worth of documents in memory, stores subscription
/// definitions with their checkpoints and arbitrates connections with the
/// opening strategies. It implements both [`SubscriptionTransport`] and
/// [`SubscriptionOperations`], so a
/// [`DocumentSubscriptions`](crate::DocumentSubscriptions) facade can run
/// entirely against it.
///
/// Cloning is cheap; clones share the same server.
#[derive(Clone)]
pub struct EmbeddedServer {
    inner: Arc<ServerInner>,
}

pub(crate) struct ServerInner {
    database: String,
    pub(crate) documents: DocumentStore,
    /// lowercase name -> entry
    subscriptions: DashMap<String, Arc<SubscriptionEntry>>,
    next_subscription_id: AtomicU64,
    next_connection_id: AtomicU64,
    authorized: AtomicBool,
    heartbeat_interval_ms: AtomicU64,
}

impl ServerInner {
    pub(crate) fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.load(Ordering::Relaxed))
    }
}

fn registry_key(name: &str) -> String {
    name.to_lowercase()
}

impl EmbeddedServer {
    pub fn new(database: impl Into<String>) -> Self {
        let database_id = nanoid::nanoid!(22);
        Self {
            inner: Arc::new(ServerInner {
                database: database.into(),
                documents: DocumentStore::new(NODE_TAG, &database_id),
                subscriptions: DashMap::new(),
                next_subscription_id: AtomicU64::new(1),
                next_connection_id: AtomicU64::new(1),
                authorized: AtomicBool::new(true),
                heartbeat_interval_ms: AtomicU64::new(DEFAULT_HEARTBEAT_INTERVAL.as_millis() as u64),
            }),
        }
    }

    pub fn database(&self) -> &str {
        &self.inner.database
    }

    /// Id used in the change vectors this server hands out
    pub fn database_id(&self) -> &str {
        self.inner.documents.database_id()
    }

    /// How long an idle connection waits before sending a heartbeat
    pub fn set_heartbeat_interval(
        &self,
        interval: Duration,
    ) {
        self.inner
            .heartbeat_interval_ms
            .store(interval.as_millis().max(1) as u64, Ordering::Relaxed);
    }

    /// Refuse every request with an authorization error while `false`
    pub fn set_authorized(
        &self,
        authorized: bool,
    ) {
        self.inner.authorized.store(authorized, Ordering::SeqCst);
    }

    /// Insert or replace a document, returning its change vector
    pub fn store(
        &self,
        key: &str,
        collection: &str,
        data: Value,
    ) -> ChangeVector {
        self.inner.documents.put(key, collection, data)
    }

    /// Add `delta` to a counter of an existing document
    pub fn increment_counter(
        &self,
        key: &str,
        counter: &str,
        delta: i64,
    ) -> Option<i64> {
        self.inner.documents.increment_counter(key, counter, delta)
    }

    /// Append a time series entry to an existing document
    ///
    /// Returns the number of entries in the series, or `None` when the
    /// document does not exist.
    pub fn append_time_series(
        &self,
        key: &str,
        name: &str,
        timestamp: SystemTime,
        values: Vec<f64>,
    ) -> Option<usize> {
        self.inner.documents.append_time_series(key, name, timestamp, values)
    }

    pub fn document(
        &self,
        key: &str,
    ) -> Option<StoredDocument> {
        self.inner.documents.get(key)
    }

    /// Connections currently holding the subscription
    pub fn active_connections(
        &self,
        name: &str,
    ) -> usize {
        self.find(name).map(|e| e.active_connections()).unwrap_or(0)
    }

    /// Connections of the subscription released so far
    pub fn released_connections(
        &self,
        name: &str,
    ) -> usize {
        self.find(name).map(|e| e.released_connections()).unwrap_or(0)
    }

    fn find(
        &self,
        name: &str,
    ) -> Option<Arc<SubscriptionEntry>> {
        self.inner.subscriptions.get(&registry_key(name)).map(|e| e.value().clone())
    }

    fn find_by_id(
        &self,
        id: u64,
    ) -> Option<Arc<SubscriptionEntry>> {
        self.inner
            .subscriptions
            .iter()
            .find(|e| e.value().record().id == id)
            .map(|e| e.value().clone())
    }

    fn entry(
        &self,
        name: &str,
    ) -> Result<Arc<SubscriptionEntry>> {
        self.find(name).ok_or_else(|| {
            SubscriptionError::SubscriptionDoesNotExist {
                name: name.to_string(),
            }
            .into()
        })
    }

    fn check_access(
        &self,
        database: &str,
    ) -> Result<()> {
        if !self.inner.authorized.load(Ordering::SeqCst) {
            return Err(SubscriptionError::Authorization(format!("access to database '{database}' was denied")).into());
        }
        if database != self.inner.database {
            return Err(SubscriptionError::DatabaseDoesNotExist {
                database: database.to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Checkpoint (etag, change vector) a start position maps to
    fn start_checkpoint(
        &self,
        position: &SubscriptionStartPosition,
    ) -> (u64, Option<ChangeVector>) {
        match position {
            SubscriptionStartPosition::BeginningOfTime | SubscriptionStartPosition::DoNotChange => (0, None),
            SubscriptionStartPosition::LastDocument => {
                let last = self.inner.documents.last_etag();
                let cv = (last > 0).then(|| ChangeVector::from_entry(NODE_TAG, last, self.database_id()));
                (last, cv)
            }
            SubscriptionStartPosition::ChangeVector(cv) => {
                let etag = cv
                    .etag_for(self.database_id())
                    .or_else(|| cv.entries().iter().map(|e| e.etag).max())
                    .unwrap_or(0);
                (etag, Some(cv.clone()))
            }
        }
    }

    fn create_subscription(
        &self,
        options: SubscriptionCreationOptions,
    ) -> Result<String> {
        options.validate()?;
        let query = options.to_query()?;
        let filter = SubscriptionFilter::parse(&query)?;

        let id = self.inner.next_subscription_id.fetch_add(1, Ordering::SeqCst);
        let name = options.name.clone().unwrap_or_else(|| id.to_string());
        let (checkpoint_etag, checkpoint_cv) =
            self.start_checkpoint(&options.change_vector.clone().unwrap_or_default());

        let record = SubscriptionRecord {
            id,
            name: name.clone(),
            query,
            filter,
            checkpoint_etag,
            checkpoint_cv,
            progress_epoch: 0,
            mentor_node: options.mentor_node,
            disabled: options.disabled,
            last_batch_ack_time: None,
            last_client_connection_time: None,
        };

        match self.inner.subscriptions.entry(registry_key(&name)) {
            Entry::Occupied(_) => Err(SubscriptionError::AlreadyExists { name }.into()),
            Entry::Vacant(vacant) => {
                vacant.insert(SubscriptionEntry::new(record));
                info!(subscription = %name, id, "subscription created");
                Ok(name)
            }
        }
    }

    fn update_subscription(
        &self,
        update: SubscriptionUpdateOptions,
    ) -> Result<String> {
        update.validate()?;

        let existing = match update.key {
            Some(key) => self.find_by_id(key),
            None => update.options.name.as_deref().and_then(|name| self.find(name)),
        };
        let Some(entry) = existing else {
            if update.create_new {
                return self.create_subscription(update.options);
            }
            let name = match update.key {
                Some(key) => key.to_string(),
                None => update.options.name.unwrap_or_default(),
            };
            return Err(SubscriptionError::SubscriptionDoesNotExist { name }.into());
        };

        let filter = match update.options.query {
            Some(_) => {
                let query = update.options.to_query()?;
                let filter = SubscriptionFilter::parse(&query)?;
                Some((query, filter))
            }
            None => None,
        };
        let checkpoint = update
            .resets_progress()
            .then(|| self.start_checkpoint(update.options.change_vector.as_ref().unwrap_or(&Default::default())));

        let old_name = entry.name();
        let new_name = match (&update.key, &update.options.name) {
            (Some(_), Some(name)) => name.clone(),
            _ => old_name.clone(),
        };
        if registry_key(&new_name) != registry_key(&old_name) {
            match self.inner.subscriptions.entry(registry_key(&new_name)) {
                Entry::Occupied(_) => return Err(SubscriptionError::AlreadyExists { name: new_name }.into()),
                Entry::Vacant(vacant) => {
                    vacant.insert(entry.clone());
                }
            }
            self.inner.subscriptions.remove(&registry_key(&old_name));
            info!(from = %old_name, to = %new_name, "subscription renamed");
        }

        entry.update_record(|record| {
            record.name = new_name.clone();
            if let Some((query, filter)) = filter {
                record.query = query;
                record.filter = filter;
            }
            if update.options.mentor_node.is_some() {
                record.mentor_node = update.options.mentor_node.clone();
            }
        });
        if let Some((etag, cv)) = checkpoint {
            entry.reset_progress(etag, cv);
            info!(subscription = %new_name, checkpoint_etag = etag, "subscription progress reset");
        }
        info!(subscription = %new_name, "subscription updated");
        Ok(new_name)
    }
}

#[async_trait]
impl SubscriptionTransport for EmbeddedServer {
    async fn connect(
        &self,
        request: ConnectionRequest,
    ) -> Result<Box<dyn SubscriptionConnection>> {
        self.check_access(&request.database)?;
        let entry = self.entry(&request.subscription_name)?;
        let connection_id = self.inner.next_connection_id.fetch_add(1, Ordering::SeqCst);

        let lease = match entry.admit(connection_id, &request)? {
            Admission::Granted(lease) => lease,
            Admission::Queued(granted) => {
                debug!(subscription = %request.subscription_name, worker_id = %request.worker_id, "waiting for the subscription to be free");
                granted
                    .await
                    .map_err(|_| NetworkError::ConnectionLost("waiting connection was abandoned".into()))??
            }
        };
        info!(
            subscription = %request.subscription_name,
            worker_id = %request.worker_id,
            connection_id,
            "connection accepted"
        );

        Ok(Box::new(EmbeddedConnection::new(
            self.inner.clone(),
            lease,
            request.max_docs_per_batch,
            request.close_when_no_docs_left,
        )))
    }
}

#[async_trait]
impl SubscriptionOperations for EmbeddedServer {
    async fn create(
        &self,
        database: &str,
        options: SubscriptionCreationOptions,
    ) -> Result<String> {
        self.check_access(database)?;
        self.create_subscription(options)
    }

    async fn update(
        &self,
        database: &str,
        options: SubscriptionUpdateOptions,
    ) -> Result<String> {
        self.check_access(database)?;
        self.update_subscription(options)
    }

    async fn delete(
        &self,
        database: &str,
        name: &str,
    ) -> Result<()> {
        self.check_access(database)?;
        let (_, entry) = self.inner.subscriptions.remove(&registry_key(name)).ok_or_else(|| {
            SubscriptionError::SubscriptionDoesNotExist {
                name: name.to_string(),
            }
        })?;
        entry.delete();
        info!(subscription = %name, "subscription deleted");
        Ok(())
    }

    async fn enable(
        &self,
        database: &str,
        name: &str,
    ) -> Result<()> {
        self.check_access(database)?;
        self.entry(name)?.enable();
        info!(subscription = %name, "subscription enabled");
        Ok(())
    }

    async fn disable(
        &self,
        database: &str,
        name: &str,
    ) -> Result<()> {
        self.check_access(database)?;
        self.entry(name)?.disable();
        info!(subscription = %name, "subscription disabled");
        Ok(())
    }

    async fn get_state(
        &self,
        database: &str,
        name: &str,
    ) -> Result<SubscriptionState> {
        self.check_access(database)?;
        Ok(self.entry(name)?.state(NODE_TAG))
    }

    async fn get_subscriptions(
        &self,
        database: &str,
        start: usize,
        take: usize,
    ) -> Result<Vec<SubscriptionState>> {
        self.check_access(database)?;
        let mut states: Vec<SubscriptionState> = self
            .inner
            .subscriptions
            .iter()
            .map(|e| e.value().state(NODE_TAG))
            .collect();
        states.sort_by_key(|s| s.subscription_id);
        Ok(states.into_iter().skip(start).take(take).collect())
    }

    async fn drop_connection(
        &self,
        database: &str,
        name: &str,
    ) -> Result<()> {
        self.check_access(database)?;
        self.entry(name)?.drop_connections();
        info!(subscription = %name, "connections dropped");
        Ok(())
    }
}
