use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Reference table '{path}' unusable: {reason}")]
    ReferenceFile { path: String, reason: String },

    #[error("Stage table '{path}' unusable: {reason}")]
    StageTable { path: String, reason: String },

    #[error("Run not initialized")]
    RunNotInitialized,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type BatchResult<T> = Result<T, BatchError>;

/// One failed geocoding attempt. Never fatal to the batch.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeocodeError {
    #[error("geocoder timed out")]
    Timeout,

    #[error("geocoder HTTP failure: {0}")]
    Http(String),

    #[error("no match for address")]
    NoMatch,

    #[error("unparseable geocoder response: {0}")]
    Parse(String),
}

/// Row-level data problems. These exclude a row from one aggregate and
/// are counted, never raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DataIssue {
    MissingField(&'static str),
    UnmatchedReferenceKey(&'static str),
}

impl DataIssue {
    pub fn key(&self) -> String {
        match self {
            DataIssue::MissingField(field) => format!("missing_field:{field}"),
            DataIssue::UnmatchedReferenceKey(table) => format!("unmatched_key:{table}"),
        }
    }
}

/// Per-run counts of [`DataIssue`]s.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueTally {
    counts: BTreeMap<String, u64>,
}

impl IssueTally {
    pub fn record(&mut self, issue: DataIssue) {
        *self.counts.entry(issue.key()).or_insert(0) += 1;
    }

    pub fn count(&self, issue: DataIssue) -> u64 {
        self.counts.get(&issue.key()).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn counts(&self) -> &BTreeMap<String, u64> {
        &self.counts
    }

    pub fn merge(&mut self, other: &IssueTally) {
        for (key, n) in &other.counts {
            *self.counts.entry(key.clone()).or_insert(0) += n;
        }
    }
}
