use std::collections::BTreeMap;
use std::collections::HashMap;
use std::time::SystemTime;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::watch;

use crate::ChangeVector;
use crate::TimeSeriesEntry;

/// A document revision held by the embedded server
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub key: String,
    pub collection: String,
    pub etag: u64,
    pub change_vector: ChangeVector,
    pub data: Value,
    pub counters: HashMap<String, i64>,
    /// Series name -> entries in timestamp order
    pub time_series: HashMap<String, Vec<TimeSeriesEntry>>,
}

#[derive(Default)]
struct Documents {
    by_key: HashMap<String, StoredDocument>,
    /// etag -> key, only the latest revision of each document
    by_etag: BTreeMap<u64, String>,
    last_etag: u64,
}

/// In-memory document table ordered by etag
///
/// Every write gets the next etag and a single-entry change vector
/// `<node_tag>:<etag>-<database_id>`. Writers publish the last etag on a
/// watch channel that open subscription connections listen to.
pub(crate) struct DocumentStore {
    node_tag: String,
    database_id: String,
    documents: RwLock<Documents>,
    last_etag_tx: watch::Sender<u64>,
}

impl DocumentStore {
    pub(crate) fn new(
        node_tag: &str,
        database_id: &str,
    ) -> Self {
        let (last_etag_tx, _) = watch::channel(0);
        Self {
            node_tag: node_tag.to_string(),
            database_id: database_id.to_string(),
            documents: RwLock::new(Documents::default()),
            last_etag_tx,
        }
    }

    pub(crate) fn database_id(&self) -> &str {
        &self.database_id
    }

    /// Insert or replace a document, returning its new change vector
    pub(crate) fn put(
        &self,
        key: &str,
        collection: &str,
        data: Value,
    ) -> ChangeVector {
        let change_vector = {
            let mut docs = self.documents.write();
            let etag = docs.last_etag + 1;
            docs.last_etag = etag;

            let (counters, time_series) = match docs.by_key.get(key) {
                Some(previous) => {
                    let old_etag = previous.etag;
                    let kept = (previous.counters.clone(), previous.time_series.clone());
                    docs.by_etag.remove(&old_etag);
                    kept
                }
                None => (HashMap::new(), HashMap::new()),
            };

            let change_vector = ChangeVector::from_entry(&self.node_tag, etag, &self.database_id);
            docs.by_etag.insert(etag, key.to_string());
            docs.by_key.insert(
                key.to_string(),
                StoredDocument {
                    key: key.to_string(),
                    collection: collection.to_string(),
                    etag,
                    change_vector: change_vector.clone(),
                    data,
                    counters,
                    time_series,
                },
            );
            change_vector
        };
        self.publish();
        change_vector
    }

    /// Add `delta` to a counter of an existing document
    ///
    /// Counter changes do not produce a new document revision.
    pub(crate) fn increment_counter(
        &self,
        key: &str,
        name: &str,
        delta: i64,
    ) -> Option<i64> {
        let mut docs = self.documents.write();
        let doc = docs.by_key.get_mut(key)?;
        let value = doc.counters.entry(name.to_string()).or_insert(0);
        *value += delta;
        Some(*value)
    }

    /// Append an entry to a time series of an existing document
    ///
    /// Like counters, time series do not produce a new document revision.
    /// Returns the number of entries in the series.
    pub(crate) fn append_time_series(
        &self,
        key: &str,
        name: &str,
        timestamp: SystemTime,
        values: Vec<f64>,
    ) -> Option<usize> {
        let mut docs = self.documents.write();
        let doc = docs.by_key.get_mut(key)?;
        let series = doc.time_series.entry(name.to_string()).or_default();
        let at = series.partition_point(|entry| entry.timestamp <= timestamp);
        series.insert(at, TimeSeriesEntry { timestamp, values });
        Some(series.len())
    }

    pub(crate) fn get(
        &self,
        key: &str,
    ) -> Option<StoredDocument> {
        self.documents.read().by_key.get(key).cloned()
    }

    pub(crate) fn last_etag(&self) -> u64 {
        self.documents.read().last_etag
    }

    /// Latest revisions with an etag greater than `after`, in etag order
    pub(crate) fn scan_after(
        &self,
        after: u64,
        limit: usize,
    ) -> Vec<StoredDocument> {
        let docs = self.documents.read();
        docs.by_etag
            .range(after + 1..)
            .take(limit)
            .filter_map(|(_, key)| docs.by_key.get(key).cloned())
            .collect()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<u64> {
        self.last_etag_tx.subscribe()
    }

    fn publish(&self) {
        let last = self.last_etag();
        self.last_etag_tx.send_replace(last);
    }
}
