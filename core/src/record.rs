//! Canonical licensee record: the single internal shape every source is
//! normalized into before anything else looks at it.

use crate::{error::DashError, types::Code};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LicenseeRecord {
    pub code:            Code,
    pub name:            String,
    pub status:          LicenseeStatus,
    pub active_clients:  u64,
    pub telecom_clients: u64,
    pub graduation_tier: GraduationTier,
    /// `None` marks a top-of-network record.
    pub sponsor_code:    Option<Code>,
    pub city:            String,
    pub state_code:      String,
    pub activation_date: Option<DateTime<Utc>>,
}

impl LicenseeRecord {
    /// Minimal record with zeroed counters, used by builders and tests.
    pub fn new(code: Code, name: impl Into<String>, sponsor_code: Option<Code>) -> Self {
        Self {
            code,
            name: name.into(),
            status: LicenseeStatus::Active,
            active_clients: 0,
            telecom_clients: 0,
            graduation_tier: GraduationTier::Consultant,
            sponsor_code,
            city: String::new(),
            state_code: String::new(),
            activation_date: None,
        }
    }

    pub fn total_clients(&self) -> u64 {
        self.active_clients.saturating_add(self.telecom_clients)
    }

    pub fn is_active(&self) -> bool {
        self.status == LicenseeStatus::Active
    }

    /// True when the record lists itself as its own sponsor.
    pub fn is_self_sponsored(&self) -> bool {
        self.sponsor_code == Some(self.code)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LicenseeStatus {
    Active,
    Inactive,
    Pending,
}

impl LicenseeStatus {
    pub const ALL: [LicenseeStatus; 3] = [Self::Active, Self::Inactive, Self::Pending];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active   => "active",
            Self::Inactive => "inactive",
            Self::Pending  => "pending",
        }
    }
}

impl FromStr for LicenseeStatus {
    type Err = DashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active"   => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            "pending"  => Ok(Self::Pending),
            other => Err(DashError::invalid_parameter(
                "status",
                format!("expected active, inactive or pending, got '{other}'"),
            )),
        }
    }
}

/// Graduation ladder. Declaration order is the ladder order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GraduationTier {
    Consultant,
    Manager,
    Executive,
    Director,
    Shareholder,
}

impl GraduationTier {
    pub const ALL: [GraduationTier; 5] = [
        Self::Consultant,
        Self::Manager,
        Self::Executive,
        Self::Director,
        Self::Shareholder,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Consultant  => "consultant",
            Self::Manager     => "manager",
            Self::Executive   => "executive",
            Self::Director    => "director",
            Self::Shareholder => "shareholder",
        }
    }

    pub fn is_entry_level(&self) -> bool {
        *self == Self::Consultant
    }
}

impl FromStr for GraduationTier {
    type Err = DashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == lowered)
            .ok_or_else(|| DashError::invalid_parameter("tier", format!("unknown tier '{s}'")))
    }
}

/// Numeric columns the aggregator and ranking can select.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NumericField {
    ActiveClients,
    TelecomClients,
    TotalClients,
    /// Number of records naming this one as sponsor.
    DirectRecruits,
}

impl NumericField {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ActiveClients  => "active_clients",
            Self::TelecomClients => "telecom_clients",
            Self::TotalClients   => "total_clients",
            Self::DirectRecruits => "direct_recruits",
        }
    }
}

impl FromStr for NumericField {
    type Err = DashError;

    /// Accepts snake_case and camelCase spellings.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .flat_map(char::to_lowercase)
            .collect();
        match key.as_str() {
            "activeclients"  => Ok(Self::ActiveClients),
            "telecomclients" => Ok(Self::TelecomClients),
            "totalclients"   => Ok(Self::TotalClients),
            "directrecruits" => Ok(Self::DirectRecruits),
            _ => Err(DashError::InvalidField { name: s.to_string() }),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Ascending,
    #[default]
    Descending,
}

impl FromStr for SortDirection {
    type Err = DashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" | "ascending"   => Ok(Self::Ascending),
            "desc" | "descending" => Ok(Self::Descending),
            other => Err(DashError::invalid_parameter(
                "direction",
                format!("expected asc or desc, got '{other}'"),
            )),
        }
    }
}
