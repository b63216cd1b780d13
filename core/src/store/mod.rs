//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! The pipeline calls store methods and never executes SQL directly.

use crate::{
    error::{BatchError, BatchResult},
    event::EventLogEntry,
    types::Year,
};
use rusqlite::{params, Connection};

mod dashboard;
mod geocode_cache;

pub struct DashboardStore {
    conn: Connection,
}

impl DashboardStore {
    /// Open (or create) the dashboard database at `path`.
    pub fn open(path: &str) -> BatchResult<Self> {
        let conn = Connection::open(path)?;
        // WAL mode: better concurrent read performance for the dashboard.
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> BatchResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> BatchResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_foundation.sql"))?;
        Ok(())
    }

    // ── Run ────────────────────────────────────────────────────

    pub fn insert_run(&self, run_id: &str, year: Year, version: &str) -> BatchResult<()> {
        self.conn.execute(
            "INSERT INTO batch_run (run_id, year, version, started_at) VALUES (?1, ?2, ?3, ?4)",
            params![run_id, year, version, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn run_year(&self, run_id: &str) -> BatchResult<Year> {
        self.conn
            .query_row(
                "SELECT year FROM batch_run WHERE run_id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => BatchError::RunNotInitialized,
                other => BatchError::Database(other),
            })
    }

    // ── Event log ──────────────────────────────────────────────

    pub fn append_event(&self, entry: &EventLogEntry) -> BatchResult<()> {
        self.conn.execute(
            "INSERT INTO event_log (run_id, seq, step, event_type, payload)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.run_id,
                entry.seq as i64,
                entry.step,
                entry.event_type,
                entry.payload,
            ],
        )?;
        Ok(())
    }

    pub fn events_for_run(&self, run_id: &str) -> BatchResult<Vec<EventLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, run_id, seq, step, event_type, payload
             FROM event_log WHERE run_id = ?1
             ORDER BY seq ASC, id ASC",
        )?;
        let entries = stmt
            .query_map(params![run_id], |row| {
                Ok(EventLogEntry {
                    id:         Some(row.get(0)?),
                    run_id:     row.get(1)?,
                    seq:        row.get::<_, i64>(2)? as u64,
                    step:       row.get(3)?,
                    event_type: row.get(4)?,
                    payload:    row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn count_events_of_type(&self, run_id: &str, event_type: &str) -> BatchResult<u64> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM event_log WHERE run_id = ?1 AND event_type = ?2",
            params![run_id, event_type],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }
}
