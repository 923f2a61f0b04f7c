//! Derived-insight classifier: fixed business rules over one record and
//! its population.
//!
//! Risk score: each triggered factor adds its configured weight, the sum
//! is capped at `score_cap`. Label bands:
//!   score >  urgent_above                 → urgent
//!   monitor_from <= score <= urgent_above → monitor
//!   score <  monitor_from                 → low_risk
//!
//! Missing inputs count as zero (a missing tier counts as the entry tier),
//! so classification always produces a label.

use crate::{
    config::RiskRules,
    hierarchy::direct_recruit_counts,
    metrics::{self, Quartiles},
    record::{GraduationTier, LicenseeRecord, NumericField},
    types::Code,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RiskLabel {
    Urgent,
    Monitor,
    LowRisk,
}

impl RiskLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Urgent  => "urgent",
            Self::Monitor => "monitor",
            Self::LowRisk => "low_risk",
        }
    }
}

/// Position of a record's active clients against population quartiles.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceCluster {
    TopPerformer,
    Steady,
    Developing,
    Lagging,
}

/// Classifier inputs. Any `None` is treated as zero.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RiskInputs {
    pub active_clients:  Option<u64>,
    pub telecom_clients: Option<u64>,
    pub direct_recruits: Option<usize>,
    pub graduation_tier: Option<GraduationTier>,
}

impl RiskInputs {
    pub fn from_record(record: &LicenseeRecord, direct_recruits: usize) -> Self {
        Self {
            active_clients:  Some(record.active_clients),
            telecom_clients: Some(record.telecom_clients),
            direct_recruits: Some(direct_recruits),
            graduation_tier: Some(record.graduation_tier),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskAssessment {
    pub id:      Code,
    pub name:    String,
    pub score:   f64,
    pub label:   RiskLabel,
    pub factors: Vec<String>,
    pub cluster: PerformanceCluster,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RiskSummary {
    pub urgent:   usize,
    pub monitor:  usize,
    pub low_risk: usize,
}

pub struct InsightClassifier {
    rules: RiskRules,
}

impl InsightClassifier {
    pub fn new(rules: RiskRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &RiskRules {
        &self.rules
    }

    /// Capped score plus one factor string per triggered rule.
    pub fn score(&self, inputs: &RiskInputs) -> (f64, Vec<String>) {
        let r = &self.rules;
        let mut score = 0.0f64;
        let mut factors = Vec::new();

        let active = inputs.active_clients.unwrap_or(0);
        if active < r.low_active_clients_threshold {
            score += r.low_active_clients_weight;
            factors.push(format!(
                "active clients below {} ({active})",
                r.low_active_clients_threshold
            ));
        }

        if inputs.telecom_clients.unwrap_or(0) == 0 {
            score += r.no_telecom_weight;
            factors.push("no telecom clients".into());
        }

        if inputs.direct_recruits.unwrap_or(0) == 0 {
            score += r.no_recruits_weight;
            factors.push("no downstream recruits".into());
        }

        let tier = inputs.graduation_tier.unwrap_or(GraduationTier::Consultant);
        if tier.is_entry_level() {
            score += r.entry_tier_weight;
            factors.push(format!("entry-level tier ({})", tier.as_str()));
        }

        (score.min(r.score_cap), factors)
    }

    pub fn label_for(&self, score: f64) -> RiskLabel {
        if score > self.rules.urgent_above {
            RiskLabel::Urgent
        } else if score >= self.rules.monitor_from {
            RiskLabel::Monitor
        } else {
            RiskLabel::LowRisk
        }
    }

    pub fn cluster(value: f64, population: &Quartiles) -> PerformanceCluster {
        if value >= population.q3 {
            PerformanceCluster::TopPerformer
        } else if value >= population.q2 {
            PerformanceCluster::Steady
        } else if value >= population.q1 {
            PerformanceCluster::Developing
        } else {
            PerformanceCluster::Lagging
        }
    }

    pub fn classify(
        &self,
        record: &LicenseeRecord,
        direct_recruits: usize,
        population: &Quartiles,
    ) -> RiskAssessment {
        let (score, factors) = self.score(&RiskInputs::from_record(record, direct_recruits));
        RiskAssessment {
            id: record.code,
            name: record.name.clone(),
            score,
            label: self.label_for(score),
            factors,
            cluster: Self::cluster(record.active_clients as f64, population),
        }
    }

    /// Every record, highest score first; equal scores keep source order.
    pub fn classify_all(&self, records: &[LicenseeRecord]) -> Vec<RiskAssessment> {
        let recruits = direct_recruit_counts(records);
        let population =
            metrics::quartiles(&metrics::field_values(records, NumericField::ActiveClients));

        let mut out: Vec<RiskAssessment> = records
            .iter()
            .map(|r| {
                let n = recruits.get(&r.code).copied().unwrap_or(0);
                self.classify(r, n, &population)
            })
            .collect();
        out.sort_by(|a, b| b.score.total_cmp(&a.score));

        let summary = summarize(&out);
        log::debug!(
            "insight: classified {} records (urgent={}, monitor={}, low_risk={})",
            out.len(),
            summary.urgent,
            summary.monitor,
            summary.low_risk,
        );
        out
    }
}

pub fn summarize(assessments: &[RiskAssessment]) -> RiskSummary {
    let mut summary = RiskSummary::default();
    for a in assessments {
        match a.label {
            RiskLabel::Urgent  => summary.urgent += 1,
            RiskLabel::Monitor => summary.monitor += 1,
            RiskLabel::LowRisk => summary.low_risk += 1,
        }
    }
    summary
}
