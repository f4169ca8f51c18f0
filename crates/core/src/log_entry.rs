//! Log entry records
//!
//! A log entry is a timestamped, typed message emitted by some source
//! (e.g. a workflow actor) and persisted by a `LogEntryHandler`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A persisted log record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Database id; `None` until stored
    pub id: Option<i64>,
    /// Host that generated the entry
    pub host: String,
    /// IP address of the host
    pub ip: String,
    /// Entry type, e.g. "Error" or "Info"
    pub entry_type: String,
    /// Processing status
    pub status: String,
    /// Originator of the entry
    pub source: String,
    /// When the entry was generated
    pub generation: DateTime<Utc>,
    /// Free-form key/value payload
    pub message: BTreeMap<String, String>,
}

impl LogEntry {
    /// Create an unsaved entry of `entry_type` from `source`, generated now
    pub fn new(entry_type: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: None,
            host: String::new(),
            ip: String::new(),
            entry_type: entry_type.into(),
            status: String::new(),
            source: source.into(),
            generation: Utc::now(),
            message: BTreeMap::new(),
        }
    }

    /// Set the status
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = status.into();
        self
    }

    /// Set the host name
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the IP address
    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = ip.into();
        self
    }

    /// Set the generation time
    pub fn with_generation(mut self, generation: DateTime<Utc>) -> Self {
        self.generation = generation;
        self
    }

    /// Add a message property
    pub fn with_message(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.message.insert(key.into(), value.into());
        self
    }

    /// Same entry carrying the given database id
    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }
}

/// Conditions for selecting log entries
///
/// Empty fields do not restrict the selection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogEntryFilter {
    /// Accepted entry types; empty accepts all
    pub entry_types: Vec<String>,
    /// Required status
    pub status: Option<String>,
    /// Required source
    pub source: Option<String>,
    /// Inclusive lower bound on generation time
    pub since: Option<DateTime<Utc>>,
    /// Exclusive upper bound on generation time
    pub until: Option<DateTime<Utc>>,
    /// Maximum number of entries returned
    pub limit: Option<usize>,
}

impl LogEntryFilter {
    /// Filter accepting every entry
    pub fn all() -> Self {
        Self::default()
    }

    /// Accept an additional entry type
    pub fn with_type(mut self, entry_type: impl Into<String>) -> Self {
        self.entry_types.push(entry_type.into());
        self
    }

    /// Require a status
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    /// Require a source
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Restrict to `[since, until)`
    pub fn between(mut self, since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self.until = Some(until);
        self
    }

    /// Cap the number of results
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `entry` satisfies every condition except the limit
    pub fn matches(&self, entry: &LogEntry) -> bool {
        if !self.entry_types.is_empty() && !self.entry_types.iter().any(|t| *t == entry.entry_type)
        {
            return false;
        }
        if self.status.as_ref().is_some_and(|s| *s != entry.status) {
            return false;
        }
        if self.source.as_ref().is_some_and(|s| *s != entry.source) {
            return false;
        }
        if self.since.is_some_and(|t| entry.generation < t) {
            return false;
        }
        if self.until.is_some_and(|t| entry.generation >= t) {
            return false;
        }
        true
    }
}
