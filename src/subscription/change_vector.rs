use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;

use crate::ProtocolError;

/// One `NODE_TAG:ETAG-DATABASE_ID` component of a change vector
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChangeVectorEntry {
    pub node_tag: String,
    pub etag: u64,
    pub database_id: String,
}

impl fmt::Display for ChangeVectorEntry {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}:{}-{}", self.node_tag, self.etag, self.database_id)
    }
}

impl FromStr for ChangeVectorEntry {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ProtocolError::InvalidChangeVector(s.to_string());

        let (node_tag, rest) = s.trim().split_once(':').ok_or_else(invalid)?;
        let (etag, database_id) = rest.split_once('-').ok_or_else(invalid)?;
        if node_tag.is_empty() || database_id.is_empty() {
            return Err(invalid());
        }
        let etag = etag.parse::<u64>().map_err(|_| invalid())?;

        Ok(Self {
            node_tag: node_tag.to_string(),
            etag,
            database_id: database_id.to_string(),
        })
    }
}

/// Opaque revision token used as the subscription checkpoint unit
///
/// The raw string is kept verbatim so it round-trips to the server unchanged.
/// Entries are parsed on construction and compared as a vector clock keyed by
/// database id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(try_from = "String", into = "String")]
pub struct ChangeVector {
    raw: String,
    entries: Vec<ChangeVectorEntry>,
}

impl ChangeVector {
    /// The empty change vector, which sorts before every other
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn parse(raw: impl Into<String>) -> Result<Self, ProtocolError> {
        let raw = raw.into();
        let entries = if raw.trim().is_empty() {
            Vec::new()
        } else {
            raw.split(',')
                .map(ChangeVectorEntry::from_str)
                .collect::<Result<Vec<_>, _>>()?
        };
        Ok(Self { raw, entries })
    }

    /// Build from a single entry
    pub fn from_entry(
        node_tag: &str,
        etag: u64,
        database_id: &str,
    ) -> Self {
        let entry = ChangeVectorEntry {
            node_tag: node_tag.to_string(),
            etag,
            database_id: database_id.to_string(),
        };
        Self {
            raw: entry.to_string(),
            entries: vec![entry],
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[ChangeVectorEntry] {
        &self.entries
    }

    /// Etag recorded for `database_id`, if any
    pub fn etag_for(
        &self,
        database_id: &str,
    ) -> Option<u64> {
        self.entries
            .iter()
            .filter(|e| e.database_id == database_id)
            .map(|e| e.etag)
            .max()
    }

    /// Vector-clock comparison
    ///
    /// Returns `None` when each side has an entry newer than the other.
    pub fn compare(
        &self,
        other: &ChangeVector,
    ) -> Option<Ordering> {
        let mine = self.by_database();
        let theirs = other.by_database();

        let mut less = false;
        let mut greater = false;

        for (db, etag) in &mine {
            match theirs.get(db) {
                Some(other_etag) if etag < other_etag => less = true,
                Some(other_etag) if etag > other_etag => greater = true,
                Some(_) => {}
                None => greater = true,
            }
        }
        if theirs.keys().any(|db| !mine.contains_key(db)) {
            less = true;
        }

        match (less, greater) {
            (false, false) => Some(Ordering::Equal),
            (true, false) => Some(Ordering::Less),
            (false, true) => Some(Ordering::Greater),
            (true, true) => None,
        }
    }

    /// `self` happened no later than `other`
    pub fn is_at_or_before(
        &self,
        other: &ChangeVector,
    ) -> bool {
        matches!(
            self.compare(other),
            Some(Ordering::Less) | Some(Ordering::Equal)
        )
    }

    /// Entry-wise maximum of both vectors
    pub fn merge(
        &self,
        other: &ChangeVector,
    ) -> ChangeVector {
        let mut merged: Vec<ChangeVectorEntry> = self.entries.clone();
        for entry in &other.entries {
            match merged.iter_mut().find(|e| e.database_id == entry.database_id) {
                Some(existing) if existing.etag < entry.etag => *existing = entry.clone(),
                Some(_) => {}
                None => merged.push(entry.clone()),
            }
        }
        let raw = merged.iter().map(|e| e.to_string()).collect::<Vec<_>>().join(", ");
        ChangeVector { raw, entries: merged }
    }

    fn by_database(&self) -> HashMap<&str, u64> {
        let mut map: HashMap<&str, u64> = HashMap::new();
        for entry in &self.entries {
            let slot = map.entry(entry.database_id.as_str()).or_insert(0);
            *slot = (*slot).max(entry.etag);
        }
        map
    }
}

impl fmt::Display for ChangeVector {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for ChangeVector {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ChangeVector {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<ChangeVector> for String {
    fn from(cv: ChangeVector) -> Self {
        cv.raw
    }
}
