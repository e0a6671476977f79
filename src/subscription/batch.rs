use std::collections::HashMap;
use std::time::SystemTime;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::ChangeVector;
use crate::ProtocolError;
use crate::Result;

/// One document change as delivered by a transport, before decoding
#[derive(Debug, Clone, PartialEq)]
pub struct RawBatchItem {
    pub key: String,
    pub change_vector: ChangeVector,
    pub data: Value,
    pub metadata: Value,
}

/// Batch frame as delivered by a transport
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawBatch {
    pub items: Vec<RawBatchItem>,
    /// Prefetched related documents, by document key
    pub included_documents: HashMap<String, Value>,
    /// Prefetched counters: document key -> counter name -> value
    pub included_counters: HashMap<String, HashMap<String, i64>>,
    /// Prefetched time series: document key -> series name -> entries
    pub included_time_series: HashMap<String, HashMap<String, Vec<TimeSeriesEntry>>>,
}

/// One point of a document time series
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeriesEntry {
    pub timestamp: SystemTime,
    pub values: Vec<f64>,
}

impl RawBatch {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn last_change_vector(&self) -> Option<&ChangeVector> {
        self.items.last().map(|item| &item.change_vector)
    }
}

/// A decoded document change
#[derive(Debug, Clone)]
pub struct BatchItem<T> {
    /// Originating document key
    pub key: String,
    /// Revision of the document at delivery time
    pub change_vector: ChangeVector,
    /// The resolved document
    pub result: T,
    pub metadata: Value,
}

/// Ordered group of document changes, acknowledged as a unit
///
/// Items keep server emission order. A batch only lives for the duration
/// of the processing callback and its acknowledgment.
#[derive(Debug)]
pub struct SubscriptionBatch<T> {
    subscription_name: String,
    items: Vec<BatchItem<T>>,
    included_documents: HashMap<String, Value>,
    included_counters: HashMap<String, HashMap<String, i64>>,
    included_time_series: HashMap<String, HashMap<String, Vec<TimeSeriesEntry>>>,
}

impl<T> SubscriptionBatch<T>
where
    T: DeserializeOwned,
{
    /// Decode a raw frame into typed items
    ///
    /// Fails on the first item whose payload does not fit `T`.
    pub fn decode(
        subscription_name: &str,
        raw: RawBatch,
    ) -> Result<Self> {
        let items = raw
            .items
            .into_iter()
            .map(|item| -> Result<BatchItem<T>> {
                let result = serde_json::from_value::<T>(item.data).map_err(|source| ProtocolError::DocumentDecode {
                    key: item.key.clone(),
                    source,
                })?;
                Ok(BatchItem {
                    key: item.key,
                    change_vector: item.change_vector,
                    result,
                    metadata: item.metadata,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            subscription_name: subscription_name.to_string(),
            items,
            included_documents: raw.included_documents,
            included_counters: raw.included_counters,
            included_time_series: raw.included_time_series,
        })
    }
}

impl<T> SubscriptionBatch<T> {
    pub fn subscription_name(&self) -> &str {
        &self.subscription_name
    }

    pub fn items(&self) -> &[BatchItem<T>] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Change vector sent back as the acknowledgment of this batch
    pub fn last_change_vector(&self) -> Option<&ChangeVector> {
        self.items.last().map(|item| &item.change_vector)
    }

    /// Typed access to a prefetched related document
    pub fn included_document<D: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<D>> {
        match self.included_documents.get(key) {
            Some(value) => serde_json::from_value::<D>(value.clone())
                .map(Some)
                .map_err(|source| {
                    ProtocolError::DocumentDecode {
                        key: key.to_string(),
                        source,
                    }
                    .into()
                }),
            None => Ok(None),
        }
    }

    pub fn included_counter(
        &self,
        document_key: &str,
        counter: &str,
    ) -> Option<i64> {
        self.included_counters
            .get(document_key)
            .and_then(|counters| counters.get(counter))
            .copied()
    }

    /// Prefetched entries of the time series `name` of `document_key`
    pub fn included_time_series(
        &self,
        document_key: &str,
        name: &str,
    ) -> Option<&[TimeSeriesEntry]> {
        self.included_time_series
            .get(document_key)
            .and_then(|series| series.get(name))
            .map(Vec::as_slice)
    }
}
