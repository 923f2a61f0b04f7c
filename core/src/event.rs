//! Events the dashboard service records.
//!
//! RULE: the service reports what it did through events; the store keeps
//! them in `event_log` as tagged JSON. Variants are only ever appended.

use crate::{error::DashResult, types::{BatchId, Code}};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DashEvent {
    // ── Loading ────────────────────────────────────
    RecordsLoaded {
        source:     String,
        accepted:   usize,
        rejected:   usize,
        duplicates: usize,
        batch_id:   Option<BatchId>,
    },
    SourceFailed {
        source:  String,
        message: String,
    },
    OrphansDetected {
        count: usize,
        codes: Vec<Code>,
    },

    // ── Cache ──────────────────────────────────────
    CacheInvalidated {
        entries: usize,
    },

    // ── Insight and chat ───────────────────────────
    RiskReportGenerated {
        urgent:   usize,
        monitor:  usize,
        low_risk: usize,
    },
    ChatAnswered {
        intent: String,
        source: String,
    },
}

impl DashEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::RecordsLoaded { .. }       => "records_loaded",
            Self::SourceFailed { .. }        => "source_failed",
            Self::OrphansDetected { .. }     => "orphans_detected",
            Self::CacheInvalidated { .. }    => "cache_invalidated",
            Self::RiskReportGenerated { .. } => "risk_report_generated",
            Self::ChatAnswered { .. }        => "chat_answered",
        }
    }

    pub fn to_entry(&self, occurred_at: DateTime<Utc>) -> DashResult<EventLogEntry> {
        Ok(EventLogEntry {
            id: None,
            occurred_at,
            event_type: self.event_type().to_string(),
            payload: serde_json::to_string(self)?,
        })
    }
}

/// A persisted event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventLogEntry {
    pub id:          Option<i64>,
    pub occurred_at: DateTime<Utc>,
    pub event_type:  String,
    pub payload:     String, // JSON-serialized DashEvent
}

impl EventLogEntry {
    pub fn event(&self) -> DashResult<DashEvent> {
        Ok(serde_json::from_str(&self.payload)?)
    }
}
