//! SQLite persistence layer.
//!
//! RULE: only the store talks to the database. The service and the
//! record sources call store methods; they never execute SQL directly.
//!
//! Timestamps are stored as RFC 3339 text.

use crate::{
    error::{DashError, DashResult},
    event::{DashEvent, EventLogEntry},
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

mod batch;
mod licensee;

pub use batch::IngestBatch;
pub use licensee::{LicenseeQuery, LicenseeSort, Page};

pub struct DashStore {
    conn: Connection,
    path: Option<String>, // None for :memory:
}

impl DashStore {
    pub fn open(path: &str) -> DashResult<Self> {
        let conn = Connection::open(path)?;
        // WAL only matters for real files; :memory: ignores it.
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        log::debug!("store: opened {path}");
        Ok(Self {
            conn,
            path: Some(path.to_string()),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> DashResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn, path: None })
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Apply all schema migrations in order. Safe to run repeatedly.
    pub fn migrate(&self) -> DashResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_foundation.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/002_licensees.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/003_ingest_batches.sql"))?;
        Ok(())
    }

    // ── Event log ──────────────────────────────────────────────

    pub fn append_event(&self, entry: &EventLogEntry) -> DashResult<i64> {
        self.conn.execute(
            "INSERT INTO event_log (occurred_at, event_type, payload) VALUES (?1, ?2, ?3)",
            params![entry.occurred_at.to_rfc3339(), entry.event_type, entry.payload],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn record_event(&self, event: &DashEvent, at: DateTime<Utc>) -> DashResult<i64> {
        self.append_event(&event.to_entry(at)?)
    }

    /// Most recent `limit` events, newest first.
    pub fn recent_events(&self, limit: usize) -> DashResult<Vec<EventLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, occurred_at, event_type, payload
             FROM event_log ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(event_entry).collect()
    }

    /// Every event of one type, oldest first.
    pub fn events_of_type(&self, event_type: &str) -> DashResult<Vec<EventLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, occurred_at, event_type, payload
             FROM event_log WHERE event_type = ?1
             ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![event_type], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(event_entry).collect()
    }
}

fn event_entry(
    (id, occurred_at, event_type, payload): (i64, String, String, String),
) -> DashResult<EventLogEntry> {
    Ok(EventLogEntry {
        id: Some(id),
        occurred_at: parse_timestamp(&occurred_at)?,
        event_type,
        payload,
    })
}

pub(crate) fn parse_timestamp(raw: &str) -> DashResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| DashError::Other(anyhow::anyhow!("bad timestamp '{raw}' in store: {e}")))
}
