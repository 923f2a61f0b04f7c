//! Shared primitive types used across the analytics core.

/// A licensee's unique network code. Code 0 is the "no sponsor" sentinel.
pub type Code = u64;

/// Sponsor value spreadsheets use to mark a top-of-network record.
pub const ROOT_SENTINEL: Code = 0;

/// A stable identifier for one ingest batch.
pub type BatchId = String;
