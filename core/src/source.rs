//! Record sources: where the flat licensee list comes from.
//!
//! RULE: a source either returns a complete normalized list or an error.
//! Partial data is never handed to the service. Source failures are
//! `DashError::Upstream`.

use crate::{
    error::{DashError, DashResult},
    ingest::{IngestReport, Ingestor},
    record::LicenseeRecord,
    store::DashStore,
};
use serde_json::Value;
use std::path::PathBuf;

pub trait RecordSource {
    /// Short label used in logs, events and error messages.
    fn name(&self) -> String;

    fn fetch(&mut self, ingestor: &Ingestor) -> DashResult<(Vec<LicenseeRecord>, IngestReport)>;
}

// ── JSON file ──────────────────────────────────────────────────────

/// A JSON export on disk: rows keyed by header, a header-first grid, or a
/// spreadsheet `{"values": [...]}` response.
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RecordSource for JsonFileSource {
    fn name(&self) -> String {
        format!("json_file:{}", self.path.display())
    }

    fn fetch(&mut self, ingestor: &Ingestor) -> DashResult<(Vec<LicenseeRecord>, IngestReport)> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| DashError::Upstream {
            source_name: self.name(),
            message: format!("cannot read {}: {e}", self.path.display()),
            retryable: true,
        })?;
        let payload: Value = serde_json::from_str(&content).map_err(|e| DashError::Upstream {
            source_name: self.name(),
            message: format!("malformed JSON: {e}"),
            retryable: false,
        })?;
        normalize_payload(&self.name(), ingestor, &payload)
    }
}

// ── In memory ──────────────────────────────────────────────────────

enum Held {
    Records(Vec<LicenseeRecord>),
    Payload(Value),
}

/// Records or a raw payload held in memory. Used by tests and by the
/// runner's `--generate` mode.
pub struct InMemorySource {
    held: Held,
}

impl InMemorySource {
    /// Already-canonical records; handed out as-is.
    pub fn from_records(records: Vec<LicenseeRecord>) -> Self {
        Self { held: Held::Records(records) }
    }

    /// A raw payload that goes through ingestion on every fetch.
    pub fn from_payload(payload: Value) -> Self {
        Self { held: Held::Payload(payload) }
    }

    pub fn replace_records(&mut self, records: Vec<LicenseeRecord>) {
        self.held = Held::Records(records);
    }
}

impl RecordSource for InMemorySource {
    fn name(&self) -> String {
        "in_memory".into()
    }

    fn fetch(&mut self, ingestor: &Ingestor) -> DashResult<(Vec<LicenseeRecord>, IngestReport)> {
        match &self.held {
            Held::Records(records) => {
                let report = IngestReport {
                    rows_seen: records.len(),
                    accepted: records.len(),
                    ..IngestReport::default()
                };
                Ok((records.clone(), report))
            }
            Held::Payload(payload) => normalize_payload(&self.name(), ingestor, payload),
        }
    }
}

// ── Store ──────────────────────────────────────────────────────────

/// The last network synced into SQLite.
pub struct StoreSource {
    store: DashStore,
}

impl StoreSource {
    pub fn new(store: DashStore) -> Self {
        Self { store }
    }
}

impl RecordSource for StoreSource {
    fn name(&self) -> String {
        format!("store:{}", self.store.path().unwrap_or(":memory:"))
    }

    fn fetch(&mut self, _ingestor: &Ingestor) -> DashResult<(Vec<LicenseeRecord>, IngestReport)> {
        let records = self.store.all_licensees().map_err(|e| DashError::Upstream {
            source_name: self.name(),
            message: e.to_string(),
            retryable: true,
        })?;
        let report = IngestReport {
            rows_seen: records.len(),
            accepted: records.len(),
            ..IngestReport::default()
        };
        Ok((records, report))
    }
}

/// Payload shape problems are the source's fault, not the caller's.
fn normalize_payload(
    source_name: &str,
    ingestor: &Ingestor,
    payload: &Value,
) -> DashResult<(Vec<LicenseeRecord>, IngestReport)> {
    ingestor.normalize_json(payload).map_err(|e| match e {
        DashError::InvalidParameter { reason, .. } => DashError::Upstream {
            source_name: source_name.to_string(),
            message: reason,
            retryable: false,
        },
        other => other,
    })
}
