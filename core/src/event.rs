//! The batch event log.
//!
//! RULE: everything a run decided that is not itself a dashboard row is
//! recorded here: which categories were analysed or skipped, each flow
//! cohort, each geocoding outcome, and the data issues of each category.
//! Variants are only ever added, never removed or reordered.

use crate::{
    error::IssueTally,
    types::{RunId, Year},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchEvent {
    // ── Run ────────────────────────────────────────
    RunStarted {
        run_id: RunId,
        year: Year,
        stage_rows: usize,
    },
    NotFiledCleaned {
        removed_rows: usize,
    },
    RunCompleted {
        report_rows: usize,
        flow_cohorts: usize,
        hex_cells: usize,
    },

    // ── Category aggregation ───────────────────────
    CategoryAnalyzed {
        category: String,
        tables: usize,
        rows: usize,
    },
    CategorySkipped {
        category: String,
    },
    DataIssues {
        category: String,
        tally: IssueTally,
    },

    // ── Consolidated history ───────────────────────
    FlowComputed {
        year: Year,
        category: String,
        received: usize,
        declined: usize,
        under_review: usize,
        filed: usize,
        active: usize,
        disposed: usize,
        disposed_unfiled: usize,
    },

    // ── Geocoding ──────────────────────────────────
    AddressGeocoded {
        address: String,
        latitude: f64,
        longitude: f64,
        attempts: u32,
    },
    AddressUngeocodable {
        address: String,
        attempts: u32,
        last_error: String,
    },

    // ── Persistence ────────────────────────────────
    SinkFailed {
        sink: String,
        reason: String,
    },
}

impl BatchEvent {
    /// Stable name for the `event_type` column of `event_log`.
    pub fn event_type_name(&self) -> &'static str {
        match self {
            BatchEvent::RunStarted { .. }          => "run_started",
            BatchEvent::NotFiledCleaned { .. }     => "not_filed_cleaned",
            BatchEvent::RunCompleted { .. }        => "run_completed",
            BatchEvent::CategoryAnalyzed { .. }    => "category_analyzed",
            BatchEvent::CategorySkipped { .. }     => "category_skipped",
            BatchEvent::DataIssues { .. }          => "data_issues",
            BatchEvent::FlowComputed { .. }        => "flow_computed",
            BatchEvent::AddressGeocoded { .. }     => "address_geocoded",
            BatchEvent::AddressUngeocodable { .. } => "address_ungeocodable",
            BatchEvent::SinkFailed { .. }          => "sink_failed",
        }
    }
}

/// The event log entry as persisted to SQLite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id: Option<i64>,
    pub run_id: RunId,
    /// Position of the event within its run.
    pub seq: u64,
    /// Pipeline step that emitted it ("aggregate", "flow", "geocode", ...).
    pub step: String,
    pub event_type: String,
    pub payload: String, // JSON-serialized BatchEvent
}

impl EventLogEntry {
    pub fn decode(&self) -> serde_json::Result<BatchEvent> {
        serde_json::from_str(&self.payload)
    }
}
