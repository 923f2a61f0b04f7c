//! Metrics aggregator: descriptive statistics, ranking and breakdowns
//! over the flat record list.
//!
//! Conventions the dashboard depends on:
//!   - Standard deviation is the population formula (divide by n).
//!   - Quartiles are an index pick on the ascending sort:
//!     `sorted[floor(n * 0.25)]`, `sorted[floor(n * 0.5)]`,
//!     `sorted[floor(n * 0.75)]`. No interpolation.
//!   - Empty input yields zeros everywhere, never NaN.
//!   - Rankings are stable: equal values keep source order.

use crate::{
    error::DashError,
    hierarchy::{direct_recruit_counts, HierarchyBuilder},
    record::{LicenseeRecord, LicenseeStatus, NumericField, SortDirection},
    types::Code,
};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, str::FromStr};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct Quartiles {
    pub q1: f64,
    pub q2: f64,
    pub q3: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AggregatedMetrics {
    pub field:        NumericField,
    /// Status filter applied before aggregating, if any.
    pub status:       Option<LicenseeStatus>,
    pub count:        usize,
    pub active_count: usize,
    pub sum:          f64,
    pub mean:         f64,
    pub std_dev:      f64,
    pub min:          f64,
    pub max:          f64,
    pub quartiles:    Quartiles,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ZScore {
    pub code:  Code,
    pub value: f64,
    pub z:     f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankedEntry {
    /// 1-based position.
    pub rank:  usize,
    pub code:  Code,
    pub name:  String,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BreakdownKey {
    State,
    City,
    Tier,
    Status,
}

impl FromStr for BreakdownKey {
    type Err = DashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "state" | "uf" | "state_code" => Ok(Self::State),
            "city" | "cidade"             => Ok(Self::City),
            "tier" | "graduation_tier"    => Ok(Self::Tier),
            "status"                      => Ok(Self::Status),
            _ => Err(DashError::invalid_parameter(
                "by",
                format!("expected state, city, tier or status, got '{s}'"),
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BreakdownRow {
    pub key:            String,
    pub count:          usize,
    pub active_count:   usize,
    pub active_clients: u64,
}

/// Headline KPIs for the dashboard landing view.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkOverview {
    pub total:                 usize,
    pub active:                usize,
    pub inactive:              usize,
    pub pending:               usize,
    /// active / total, 0 when empty.
    pub activation_rate:       f64,
    pub total_active_clients:  u64,
    pub total_telecom_clients: u64,
    pub roots:                 usize,
    pub orphans:               usize,
    pub max_depth:             usize,
}

/// Values of `field` in record order.
pub fn field_values(records: &[LicenseeRecord], field: NumericField) -> Vec<f64> {
    let recruits = (field == NumericField::DirectRecruits).then(|| direct_recruit_counts(records));
    records
        .iter()
        .map(|r| field_value(r, field, recruits.as_ref()))
        .collect()
}

fn field_value(
    record: &LicenseeRecord,
    field: NumericField,
    recruits: Option<&HashMap<Code, usize>>,
) -> f64 {
    match field {
        NumericField::ActiveClients  => record.active_clients as f64,
        NumericField::TelecomClients => record.telecom_clients as f64,
        NumericField::TotalClients   => record.total_clients() as f64,
        NumericField::DirectRecruits => recruits
            .and_then(|m| m.get(&record.code))
            .copied()
            .unwrap_or(0) as f64,
    }
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// sqrt(mean of squared deviations). Divides by n, not n - 1.
pub fn population_std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Index-pick quartiles over an ascending copy of `values`.
pub fn quartiles(values: &[f64]) -> Quartiles {
    if values.is_empty() {
        return Quartiles::default();
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len();
    let pick = |fraction: f64| sorted[((n as f64 * fraction).floor() as usize).min(n - 1)];
    Quartiles {
        q1: pick(0.25),
        q2: pick(0.5),
        q3: pick(0.75),
    }
}

pub fn aggregate(
    records: &[LicenseeRecord],
    field: NumericField,
    status: Option<LicenseeStatus>,
) -> AggregatedMetrics {
    // Recruit counts come from the full list so filtering by status does
    // not hide recruits of a different status.
    let recruits = (field == NumericField::DirectRecruits).then(|| direct_recruit_counts(records));
    let subset: Vec<&LicenseeRecord> = records
        .iter()
        .filter(|r| status.map_or(true, |s| r.status == s))
        .collect();
    let values: Vec<f64> = subset
        .iter()
        .map(|r| field_value(r, field, recruits.as_ref()))
        .collect();

    let (min, max) = if values.is_empty() {
        (0.0, 0.0)
    } else {
        values
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(*v), hi.max(*v)))
    };

    AggregatedMetrics {
        field,
        status,
        count: values.len(),
        active_count: subset.iter().filter(|r| r.is_active()).count(),
        sum: values.iter().sum(),
        mean: mean(&values),
        std_dev: population_std_dev(&values),
        min,
        max,
        quartiles: quartiles(&values),
    }
}

/// Standard score per record. Zero for everyone when the spread is zero.
pub fn z_scores(records: &[LicenseeRecord], field: NumericField) -> Vec<ZScore> {
    let values = field_values(records, field);
    let m = mean(&values);
    let sd = population_std_dev(&values);
    records
        .iter()
        .zip(values)
        .map(|(r, value)| ZScore {
            code: r.code,
            value,
            z: if sd > 0.0 { (value - m) / sd } else { 0.0 },
        })
        .collect()
}

/// Top `limit` records by `field`. Ties keep source order.
pub fn rank(
    records: &[LicenseeRecord],
    field: NumericField,
    direction: SortDirection,
    limit: usize,
) -> Vec<RankedEntry> {
    let values = field_values(records, field);
    let mut indexed: Vec<(usize, f64)> = values.into_iter().enumerate().collect();
    // slice::sort_by is stable.
    match direction {
        SortDirection::Ascending  => indexed.sort_by(|a, b| a.1.total_cmp(&b.1)),
        SortDirection::Descending => indexed.sort_by(|a, b| b.1.total_cmp(&a.1)),
    }
    indexed
        .into_iter()
        .take(limit)
        .enumerate()
        .map(|(pos, (idx, value))| RankedEntry {
            rank: pos + 1,
            code: records[idx].code,
            name: records[idx].name.clone(),
            value,
        })
        .collect()
}

/// Counts per key, largest first; equal counts keep first-seen order.
pub fn breakdown(records: &[LicenseeRecord], by: BreakdownKey) -> Vec<BreakdownRow> {
    let mut rows: Vec<BreakdownRow> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for record in records {
        let key = match by {
            BreakdownKey::State  => record.state_code.clone(),
            BreakdownKey::City   => record.city.clone(),
            BreakdownKey::Tier   => record.graduation_tier.as_str().to_string(),
            BreakdownKey::Status => record.status.as_str().to_string(),
        };
        let key = if key.is_empty() { "unknown".to_string() } else { key };
        let slot = *index.entry(key.clone()).or_insert_with(|| {
            rows.push(BreakdownRow { key, count: 0, active_count: 0, active_clients: 0 });
            rows.len() - 1
        });
        let row = &mut rows[slot];
        row.count += 1;
        row.active_clients = row.active_clients.saturating_add(record.active_clients);
        if record.is_active() {
            row.active_count += 1;
        }
    }

    rows.sort_by(|a, b| b.count.cmp(&a.count));
    rows
}

pub fn overview(records: &[LicenseeRecord]) -> NetworkOverview {
    let count_status = |s: LicenseeStatus| records.iter().filter(|r| r.status == s).count();
    let active = count_status(LicenseeStatus::Active);
    let total = records.len();

    let builder = HierarchyBuilder::new(records);
    let forest = builder.forest(None);

    NetworkOverview {
        total,
        active,
        inactive: count_status(LicenseeStatus::Inactive),
        pending: count_status(LicenseeStatus::Pending),
        activation_rate: if total > 0 { active as f64 / total as f64 } else { 0.0 },
        total_active_clients: saturating_total(records, |r| r.active_clients),
        total_telecom_clients: saturating_total(records, |r| r.telecom_clients),
        roots: forest.trees.len(),
        orphans: forest.orphans.len(),
        max_depth: forest.trees.iter().map(|t| t.max_level()).max().unwrap_or(0),
    }
}

fn saturating_total(records: &[LicenseeRecord], count: impl Fn(&LicenseeRecord) -> u64) -> u64 {
    records.iter().fold(0u64, |acc, r| acc.saturating_add(count(r)))
}
