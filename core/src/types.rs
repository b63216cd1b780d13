//! Shared primitive types used across the entire batch.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The `File #` join key shared by every stage table.
pub type CaseId = String;

/// A reporting year (the year a case was received).
pub type Year = i32;

/// The canonical batch run identifier.
pub type RunId = String;

/// Life-cycle stage of a case. One stage table per variant.
///
/// Order is fixed: it is the column order of every dashboard table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Received,
    NotFiled,
    Filed,
    Disposed,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::Received,
        Stage::NotFiled,
        Stage::Filed,
        Stage::Disposed,
    ];

    /// Column label used by the dashboard.
    pub fn label(self) -> &'static str {
        match self {
            Stage::Received => "Received",
            Stage::NotFiled => "Not-Filed",
            Stage::Filed    => "Filed",
            Stage::Disposed => "Disposed",
        }
    }

    pub fn index(self) -> usize {
        match self {
            Stage::Received => 0,
            Stage::NotFiled => 1,
            Stage::Filed    => 2,
            Stage::Disposed => 3,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Charge-category filter applied to a batch of stage tables.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryFilter {
    /// No filter: every case counts.
    All,
    /// Only cases whose charge code maps to this category label.
    Category(String),
}

impl CategoryFilter {
    pub fn label(&self) -> &str {
        match self {
            CategoryFilter::All => "All",
            CategoryFilter::Category(name) => name,
        }
    }

    /// Label written to the combined dashboard table.
    /// "All" sorts first in the dashboard's category picker as "*All".
    pub fn report_label(&self) -> String {
        match self {
            CategoryFilter::All => "*All".to_string(),
            CategoryFilter::Category(name) => name.clone(),
        }
    }

    pub fn matches(&self, category: Option<&str>) -> bool {
        match self {
            CategoryFilter::All => true,
            CategoryFilter::Category(name) => category == Some(name.as_str()),
        }
    }
}

impl fmt::Display for CategoryFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A WGS84 point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }
}
