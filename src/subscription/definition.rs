use serde::Deserialize;
use serde::Serialize;

use crate::ChangeVector;
use crate::ProtocolError;
use crate::Result;
use crate::SubscriptionError;

const BEGINNING_OF_TIME: &str = "BeginningOfTime";
const LAST_DOCUMENT: &str = "LastDocument";
const DO_NOT_CHANGE: &str = "DoNotChange";

/// Where a subscription starts (or restarts, on update) reading changes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SubscriptionStartPosition {
    /// Deliver every matching document from the start of the change stream
    #[default]
    BeginningOfTime,
    /// Skip existing documents, deliver only changes made after creation
    LastDocument,
    /// Keep the current checkpoint (only meaningful for updates)
    DoNotChange,
    /// Resume right after the given change vector
    ChangeVector(ChangeVector),
}

impl SubscriptionStartPosition {
    pub fn to_wire(&self) -> String {
        match self {
            SubscriptionStartPosition::BeginningOfTime => BEGINNING_OF_TIME.to_string(),
            SubscriptionStartPosition::LastDocument => LAST_DOCUMENT.to_string(),
            SubscriptionStartPosition::DoNotChange => DO_NOT_CHANGE.to_string(),
            SubscriptionStartPosition::ChangeVector(cv) => cv.to_string(),
        }
    }

    pub fn from_wire(value: &str) -> std::result::Result<Self, ProtocolError> {
        Ok(match value {
            "" | BEGINNING_OF_TIME => SubscriptionStartPosition::BeginningOfTime,
            LAST_DOCUMENT => SubscriptionStartPosition::LastDocument,
            DO_NOT_CHANGE => SubscriptionStartPosition::DoNotChange,
            raw => SubscriptionStartPosition::ChangeVector(ChangeVector::parse(raw)?),
        })
    }
}

/// Related data the server prefetches alongside each batch
///
/// Rendered as an `include` clause appended to the subscription query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SubscriptionIncludes {
    pub documents: Vec<String>,
    pub counters: Vec<String>,
    pub all_counters: bool,
    pub time_series: Vec<String>,
}

impl SubscriptionIncludes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Include the documents referenced by `path` (e.g. `Lines[].Product`)
    pub fn include_documents(
        mut self,
        path: impl Into<String>,
    ) -> Self {
        self.documents.push(path.into());
        self
    }

    pub fn include_counter(
        mut self,
        name: impl Into<String>,
    ) -> Self {
        self.counters.push(name.into());
        self
    }

    pub fn include_counters<I, S>(
        mut self,
        names: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.counters.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn include_all_counters(mut self) -> Self {
        self.all_counters = true;
        self
    }

    pub fn include_time_series(
        mut self,
        name: impl Into<String>,
    ) -> Self {
        self.time_series.push(name.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty() && self.counters.is_empty() && !self.all_counters && self.time_series.is_empty()
    }

    /// Render as `include a, counters('x'), ...`
    pub fn to_clause(&self) -> Option<String> {
        if self.is_empty() {
            return None;
        }

        let mut parts: Vec<String> = self.documents.clone();
        if self.all_counters {
            parts.push("counters()".to_string());
        } else {
            parts.extend(self.counters.iter().map(|c| format!("counters({})", quoted(c))));
        }
        parts.extend(self.time_series.iter().map(|t| format!("timeseries({})", quoted(t))));

        Some(format!("include {}", parts.join(", ")))
    }
}

/// Single-quoted query literal with `\` and `'` escaped
fn quoted(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// Definition of a new subscription
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SubscriptionCreationOptions {
    /// Unique per database; the server assigns one when absent
    pub name: Option<String>,
    pub query: Option<String>,
    pub includes: Option<SubscriptionIncludes>,
    pub change_vector: Option<SubscriptionStartPosition>,
    /// Preferred node to serve the subscription
    pub mentor_node: Option<String>,
    pub pin_to_mentor_node: bool,
    /// Create the subscription in disabled state
    pub disabled: bool,
}

impl SubscriptionCreationOptions {
    /// Subscribe to every document of `collection`
    pub fn for_collection(collection: &str) -> Self {
        Self {
            query: Some(format!("from '{collection}'")),
            ..Default::default()
        }
    }

    pub fn with_query(query: impl Into<String>) -> Self {
        Self {
            query: Some(query.into()),
            ..Default::default()
        }
    }

    pub fn name(
        mut self,
        name: impl Into<String>,
    ) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn includes(
        mut self,
        includes: SubscriptionIncludes,
    ) -> Self {
        self.includes = Some(includes);
        self
    }

    pub fn start_from(
        mut self,
        position: SubscriptionStartPosition,
    ) -> Self {
        self.change_vector = Some(position);
        self
    }

    pub fn mentor_node(
        mut self,
        node: impl Into<String>,
    ) -> Self {
        self.mentor_node = Some(node.into());
        self
    }

    pub fn disabled(
        mut self,
        disabled: bool,
    ) -> Self {
        self.disabled = disabled;
        self
    }

    /// Final query text sent to the server, include clause appended
    pub fn to_query(&self) -> Result<String> {
        let query = self
            .query
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .ok_or_else(|| SubscriptionError::InvalidDefinition("subscription query cannot be empty".into()))?;

        Ok(match self.includes.as_ref().and_then(SubscriptionIncludes::to_clause) {
            Some(clause) => format!("{query} {clause}"),
            None => query.to_string(),
        })
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err(SubscriptionError::InvalidDefinition("subscription name cannot be blank".into()).into());
            }
        }
        if matches!(self.change_vector, Some(SubscriptionStartPosition::DoNotChange)) {
            return Err(
                SubscriptionError::InvalidDefinition("DoNotChange is only valid when updating a subscription".into())
                    .into(),
            );
        }
        self.to_query().map(|_| ())
    }
}

/// Changes to an existing subscription
///
/// The subscription is located by `key` when set, otherwise by
/// `options.name`. Setting a start position resets the checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SubscriptionUpdateOptions {
    pub options: SubscriptionCreationOptions,
    /// Server-assigned subscription id
    pub key: Option<u64>,
    /// Create the subscription when it does not exist yet
    pub create_new: bool,
}

impl SubscriptionUpdateOptions {
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            options: SubscriptionCreationOptions::default().name(name),
            ..Default::default()
        }
    }

    pub fn by_key(key: u64) -> Self {
        Self {
            key: Some(key),
            ..Default::default()
        }
    }

    pub fn query(
        mut self,
        query: impl Into<String>,
    ) -> Self {
        self.options.query = Some(query.into());
        self
    }

    pub fn rename(
        mut self,
        name: impl Into<String>,
    ) -> Self {
        self.options.name = Some(name.into());
        self
    }

    pub fn reset_to(
        mut self,
        position: SubscriptionStartPosition,
    ) -> Self {
        self.options.change_vector = Some(position);
        self
    }

    pub fn create_new(
        mut self,
        create_new: bool,
    ) -> Self {
        self.create_new = create_new;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.key.is_none() && self.options.name.as_deref().map(str::trim).unwrap_or("").is_empty() {
            return Err(
                SubscriptionError::InvalidDefinition("update requires a subscription name or key".into()).into(),
            );
        }
        if self.create_new && self.options.query.is_none() {
            return Err(
                SubscriptionError::InvalidDefinition("create_new requires a query for the new subscription".into())
                    .into(),
            );
        }
        Ok(())
    }

    /// Whether this update moves the checkpoint
    pub fn resets_progress(&self) -> bool {
        !matches!(
            self.options.change_vector,
            None | Some(SubscriptionStartPosition::DoNotChange)
        )
    }
}
