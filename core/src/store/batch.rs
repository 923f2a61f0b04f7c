use super::{licensee::write_network, parse_timestamp, DashStore};
use crate::{
    error::DashResult,
    ingest::IngestReport,
    record::LicenseeRecord,
    types::BatchId,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

/// Bookkeeping for one ingestion pass written to the store.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct IngestBatch {
    pub batch_id:         BatchId,
    pub source:           String,
    pub loaded_at:        DateTime<Utc>,
    pub rows_seen:        usize,
    pub accepted:         usize,
    pub rejected:         usize,
    pub duplicates:       usize,
    pub cell_warnings:    usize,
    pub unmapped_headers: Vec<String>,
}

type BatchRow = (String, String, String, i64, i64, i64, i64, i64, String);

impl DashStore {
    // ── Ingest batches ─────────────────────────────────────────

    /// Replace the stored network with `records` and log the batch, in
    /// one transaction. Returns the new batch id.
    pub fn sync_network(
        &self,
        source: &str,
        records: &[LicenseeRecord],
        report: &IngestReport,
        loaded_at: DateTime<Utc>,
    ) -> DashResult<BatchId> {
        let batch_id = Uuid::new_v4().to_string();
        let tx = self.conn.unchecked_transaction()?;

        tx.execute(
            "INSERT INTO ingest_batch (
                batch_id, source, loaded_at, rows_seen, accepted,
                rejected, duplicates, cell_warnings, unmapped_headers
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
            params![
                batch_id,
                source,
                loaded_at.to_rfc3339(),
                report.rows_seen as i64,
                report.accepted as i64,
                report.rejected.len() as i64,
                report.duplicate_codes.len() as i64,
                report.cell_warnings as i64,
                serde_json::to_string(&report.unmapped_headers)?,
            ],
        )?;
        let written = write_network(&tx, records, Some(&batch_id))?;
        tx.commit()?;

        log::info!("store: batch={batch_id} source={source} wrote {written} licensees");
        Ok(batch_id)
    }

    pub fn get_ingest_batch(&self, batch_id: &str) -> DashResult<Option<IngestBatch>> {
        let row: Option<BatchRow> = self
            .conn
            .query_row(
                "SELECT batch_id, source, loaded_at, rows_seen, accepted,
                        rejected, duplicates, cell_warnings, unmapped_headers
                 FROM ingest_batch WHERE batch_id = ?1",
                params![batch_id],
                read_batch_row,
            )
            .optional()?;
        row.map(into_batch).transpose()
    }

    /// Most recently loaded batch, if any.
    pub fn latest_ingest_batch(&self) -> DashResult<Option<IngestBatch>> {
        let row: Option<BatchRow> = self
            .conn
            .query_row(
                "SELECT batch_id, source, loaded_at, rows_seen, accepted,
                        rejected, duplicates, cell_warnings, unmapped_headers
                 FROM ingest_batch ORDER BY loaded_at DESC, rowid DESC LIMIT 1",
                [],
                read_batch_row,
            )
            .optional()?;
        row.map(into_batch).transpose()
    }
}

fn read_batch_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<BatchRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
    ))
}

fn into_batch(row: BatchRow) -> DashResult<IngestBatch> {
    let (batch_id, source, loaded_at, rows_seen, accepted, rejected, duplicates, warnings, unmapped) =
        row;
    Ok(IngestBatch {
        batch_id,
        source,
        loaded_at: parse_timestamp(&loaded_at)?,
        rows_seen: rows_seen as usize,
        accepted: accepted as usize,
        rejected: rejected as usize,
        duplicates: duplicates as usize,
        cell_warnings: warnings as usize,
        unmapped_headers: serde_json::from_str(&unmapped)?,
    })
}
