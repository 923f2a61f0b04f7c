//! Ingestion: maps spreadsheet rows onto the canonical `LicenseeRecord`.
//!
//! Spreadsheet headers drift ("Clientes Ativos", "clientesAtivos",
//! "active_clients"). The `FieldMap` resolves every header variant to one
//! canonical field once, here, so nothing downstream ever sees raw headers.
//!
//! Bad cells degrade: counts fall back to 0, unknown statuses to pending,
//! unknown tiers to consultant. Only a missing or unusable `code` rejects a
//! row, and a rejected row never aborts the batch.

use crate::{
    config::IngestConfig,
    error::{DashError, DashResult},
    record::{GraduationTier, LicenseeRecord, LicenseeStatus},
    text::{fold, header_key},
    types::{Code, ROOT_SENTINEL},
};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CanonicalField {
    Code,
    Name,
    Status,
    ActiveClients,
    TelecomClients,
    GraduationTier,
    SponsorCode,
    City,
    StateCode,
    ActivationDate,
}

impl CanonicalField {
    pub const ALL: [CanonicalField; 10] = [
        Self::Code,
        Self::Name,
        Self::Status,
        Self::ActiveClients,
        Self::TelecomClients,
        Self::GraduationTier,
        Self::SponsorCode,
        Self::City,
        Self::StateCode,
        Self::ActivationDate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Code           => "code",
            Self::Name           => "name",
            Self::Status         => "status",
            Self::ActiveClients  => "active_clients",
            Self::TelecomClients => "telecom_clients",
            Self::GraduationTier => "graduation_tier",
            Self::SponsorCode    => "sponsor_code",
            Self::City           => "city",
            Self::StateCode      => "state_code",
            Self::ActivationDate => "activation_date",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.as_str() == name)
    }
}

/// Header alias table, built once from config.
#[derive(Debug, Clone)]
pub struct FieldMap {
    by_header:      HashMap<String, CanonicalField>,
    root_sentinels: HashSet<String>,
}

impl FieldMap {
    pub fn from_config(config: &IngestConfig) -> Self {
        let mut by_header = HashMap::new();

        // Canonical names always resolve, even with an empty alias table.
        for field in CanonicalField::ALL {
            by_header.insert(header_key(field.as_str()), field);
        }

        let mut names: Vec<&String> = config.field_aliases.keys().collect();
        names.sort();
        for name in names {
            let Some(field) = CanonicalField::from_name(name) else {
                log::warn!("ingest: alias table names unknown field '{name}', skipped");
                continue;
            };
            for alias in &config.field_aliases[name] {
                let key = header_key(alias);
                if let Some(previous) = by_header.insert(key.clone(), field) {
                    if previous != field {
                        log::warn!(
                            "ingest: header '{alias}' remapped from {} to {}",
                            previous.as_str(),
                            field.as_str(),
                        );
                    }
                }
            }
        }

        Self {
            by_header,
            root_sentinels: config.root_sentinels.iter().map(|s| fold(s)).collect(),
        }
    }

    pub fn resolve(&self, header: &str) -> Option<CanonicalField> {
        self.by_header.get(&header_key(header)).copied()
    }

    fn is_root_sentinel(&self, text: &str) -> bool {
        self.root_sentinels.contains(&fold(text))
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RowIssue {
    /// Zero-based index of the data row (header row excluded).
    pub row:    usize,
    pub reason: String,
}

/// Outcome of one ingestion pass. Rejections are data, not errors.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct IngestReport {
    pub rows_seen:        usize,
    pub accepted:         usize,
    pub rejected:         Vec<RowIssue>,
    pub duplicate_codes:  Vec<Code>,
    pub unmapped_headers: Vec<String>,
    /// Cells that fell back to a default value.
    pub cell_warnings:    usize,
}

pub struct Ingestor {
    map: FieldMap,
}

impl Ingestor {
    pub fn new(config: &IngestConfig) -> Self {
        Self { map: FieldMap::from_config(config) }
    }

    pub fn field_map(&self) -> &FieldMap {
        &self.map
    }

    /// Accepts any of the payload shapes record sources deliver:
    ///   - an array of objects keyed by header,
    ///   - an array of arrays whose first row is the header row,
    ///   - an object with a `values` grid (spreadsheet API response).
    pub fn normalize_json(
        &self,
        payload: &Value,
    ) -> DashResult<(Vec<LicenseeRecord>, IngestReport)> {
        match payload {
            Value::Object(obj) => match obj.get("values") {
                Some(Value::Array(rows)) => self.normalize_grid(&rows_as_grid(rows)?),
                _ => Err(DashError::invalid_parameter(
                    "payload",
                    "object payload must carry a 'values' grid",
                )),
            },
            Value::Array(rows) if rows.iter().all(Value::is_object) => {
                Ok(self.normalize_rows(rows))
            }
            Value::Array(rows) => self.normalize_grid(&rows_as_grid(rows)?),
            _ => Err(DashError::invalid_parameter(
                "payload",
                "expected an array of rows or a 'values' grid",
            )),
        }
    }

    /// Normalize header-keyed JSON objects.
    pub fn normalize_rows(&self, rows: &[Value]) -> (Vec<LicenseeRecord>, IngestReport) {
        let mut report = IngestReport::default();
        let mut unmapped: Vec<String> = Vec::new();
        let mut keyed_rows = Vec::with_capacity(rows.len());

        for row in rows {
            let Some(obj) = row.as_object() else {
                keyed_rows.push(None);
                continue;
            };
            keyed_rows.push(Some(self.key_row(obj, &mut unmapped)));
        }

        report.unmapped_headers = unmapped;
        let records = self.collect(keyed_rows, &mut report);
        (records, report)
    }

    /// Normalize a value grid whose first row holds the headers.
    pub fn normalize_grid(
        &self,
        grid: &[Vec<Value>],
    ) -> DashResult<(Vec<LicenseeRecord>, IngestReport)> {
        let mut report = IngestReport::default();
        let Some((header_row, data)) = grid.split_first() else {
            return Ok((Vec::new(), report));
        };

        let columns: Vec<Option<CanonicalField>> = header_row
            .iter()
            .map(|h| {
                let text = cell_text(h).unwrap_or_default();
                let field = self.map.resolve(&text);
                if field.is_none() && !text.is_empty() {
                    report.unmapped_headers.push(text);
                }
                field
            })
            .collect();

        if !columns.contains(&Some(CanonicalField::Code)) {
            return Err(DashError::invalid_parameter(
                "payload",
                "header row has no column mapping to 'code'",
            ));
        }

        let keyed_rows = data
            .iter()
            .map(|cells| {
                let mut keyed = HashMap::new();
                for (field, cell) in columns.iter().zip(cells) {
                    if let Some(field) = field {
                        keyed.entry(*field).or_insert_with(|| cell.clone());
                    }
                }
                Some(keyed)
            })
            .collect();

        let records = self.collect(keyed_rows, &mut report);
        Ok((records, report))
    }

    fn key_row(
        &self,
        obj: &Map<String, Value>,
        unmapped: &mut Vec<String>,
    ) -> HashMap<CanonicalField, Value> {
        let mut keyed = HashMap::new();
        for (header, value) in obj {
            match self.map.resolve(header) {
                // Object keys iterate in sorted order, so with two aliases
                // for one field the alphabetically first header wins.
                Some(field) => {
                    keyed.entry(field).or_insert_with(|| value.clone());
                }
                None => {
                    if !unmapped.contains(header) {
                        unmapped.push(header.clone());
                    }
                }
            }
        }
        keyed
    }

    fn collect(
        &self,
        keyed_rows: Vec<Option<HashMap<CanonicalField, Value>>>,
        report: &mut IngestReport,
    ) -> Vec<LicenseeRecord> {
        let mut records = Vec::with_capacity(keyed_rows.len());
        let mut seen: HashSet<Code> = HashSet::new();

        for (row, keyed) in keyed_rows.into_iter().enumerate() {
            report.rows_seen += 1;
            let Some(keyed) = keyed else {
                report.rejected.push(RowIssue { row, reason: "row is not an object".into() });
                continue;
            };
            match self.build_record(row, &keyed, report) {
                Ok(record) => {
                    if !seen.insert(record.code) {
                        log::warn!("ingest: row {row} repeats code {}, keeping first", record.code);
                        report.duplicate_codes.push(record.code);
                        continue;
                    }
                    records.push(record);
                }
                Err(reason) => {
                    log::warn!("ingest: row {row} rejected: {reason}");
                    report.rejected.push(RowIssue { row, reason });
                }
            }
        }

        report.accepted = records.len();
        if !report.unmapped_headers.is_empty() {
            log::debug!("ingest: unmapped headers {:?}", report.unmapped_headers);
        }
        log::info!(
            "ingest: {} rows seen, {} accepted, {} rejected, {} duplicates",
            report.rows_seen,
            report.accepted,
            report.rejected.len(),
            report.duplicate_codes.len(),
        );
        records
    }

    fn build_record(
        &self,
        row: usize,
        keyed: &HashMap<CanonicalField, Value>,
        report: &mut IngestReport,
    ) -> Result<LicenseeRecord, String> {
        let get = |f: CanonicalField| keyed.get(&f).filter(|v| !is_blank(v));

        let code = match get(CanonicalField::Code) {
            Some(v) => parse_code(v).ok_or_else(|| format!("unusable code {v}"))?,
            None => return Err("missing code".into()),
        };
        if code == ROOT_SENTINEL {
            return Err("code 0 is reserved for 'no sponsor'".into());
        }

        let mut warn = |field: CanonicalField, detail: String| {
            log::debug!("ingest: row {row} code {code} {}: {detail}", field.as_str());
            report.cell_warnings += 1;
        };

        let name = get(CanonicalField::Name)
            .and_then(cell_text)
            .unwrap_or_else(|| format!("#{code}"));

        let status = match get(CanonicalField::Status).and_then(cell_text) {
            Some(text) => parse_status(&text).unwrap_or_else(|| {
                warn(CanonicalField::Status, format!("unknown status '{text}', using pending"));
                LicenseeStatus::Pending
            }),
            None => {
                warn(CanonicalField::Status, "missing, using pending".into());
                LicenseeStatus::Pending
            }
        };

        let mut count = |field: CanonicalField| match get(field) {
            Some(v) => match parse_count(v) {
                Some(n) if n > MAX_COUNT => {
                    warn(field, format!("count {n} out of range, clamped to {MAX_COUNT}"));
                    MAX_COUNT
                }
                Some(n) => n,
                None => {
                    warn(field, format!("unparsable count {v}, using 0"));
                    0
                }
            },
            None => 0,
        };
        let active_clients = count(CanonicalField::ActiveClients);
        let telecom_clients = count(CanonicalField::TelecomClients);

        let graduation_tier = match get(CanonicalField::GraduationTier).and_then(cell_text) {
            Some(text) => parse_tier(&text).unwrap_or_else(|| {
                warn(CanonicalField::GraduationTier, format!("unknown tier '{text}'"));
                GraduationTier::Consultant
            }),
            None => GraduationTier::Consultant,
        };

        let sponsor_code = match get(CanonicalField::SponsorCode) {
            None => None,
            Some(v) => match cell_text(v) {
                Some(text) if self.map.is_root_sentinel(&text) => None,
                _ => match parse_code(v) {
                    Some(ROOT_SENTINEL) => None,
                    Some(sponsor) => Some(sponsor),
                    None => {
                        warn(CanonicalField::SponsorCode, format!("unusable sponsor {v}"));
                        None
                    }
                },
            },
        };

        let activation_date = match get(CanonicalField::ActivationDate) {
            Some(v) => {
                let parsed = parse_date(v);
                if parsed.is_none() {
                    warn(CanonicalField::ActivationDate, format!("unparsable date {v}"));
                }
                parsed
            }
            None => None,
        };

        Ok(LicenseeRecord {
            code,
            name,
            status,
            active_clients,
            telecom_clients,
            graduation_tier,
            sponsor_code,
            city: get(CanonicalField::City).and_then(cell_text).unwrap_or_default(),
            state_code: get(CanonicalField::StateCode)
                .and_then(cell_text)
                .map(|s| s.to_uppercase())
                .unwrap_or_default(),
            activation_date,
        })
    }
}

fn rows_as_grid(rows: &[Value]) -> DashResult<Vec<Vec<Value>>> {
    rows.iter()
        .map(|r| match r {
            Value::Array(cells) => Ok(cells.clone()),
            _ => Err(DashError::invalid_parameter("payload", "grid rows must be arrays")),
        })
        .collect()
}

fn is_blank(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Text content of a cell. Numbers are rendered, blanks are `None`.
pub fn cell_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => {
            let t = s.trim();
            (!t.is_empty()).then(|| t.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn parse_code(v: &Value) -> Option<Code> {
    match v {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0 && f.fract() == 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Client counts. Accepts numbers and digit strings, including Brazilian
/// thousands grouping ("1.234").
/// Largest client count a record can carry; it must fit a signed SQLite
/// integer.
pub const MAX_COUNT: u64 = i64::MAX as u64;

pub fn parse_count(v: &Value) -> Option<u64> {
    match v {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f.trunc() as u64)),
        Value::String(s) => {
            let t = s.trim();
            if let Ok(n) = t.parse::<u64>() {
                return Some(n);
            }
            let groups: Vec<&str> = t.split('.').collect();
            let grouped = groups.len() > 1
                && groups[0].len() <= 3
                && groups.iter().all(|g| !g.is_empty() && g.chars().all(|c| c.is_ascii_digit()))
                && groups[1..].iter().all(|g| g.len() == 3);
            if grouped {
                return groups.concat().parse().ok();
            }
            t.replace(',', ".")
                .parse::<f64>()
                .ok()
                .filter(|f| *f >= 0.0 && f.is_finite())
                .map(|f| f.trunc() as u64)
        }
        _ => None,
    }
}

pub fn parse_status(text: &str) -> Option<LicenseeStatus> {
    match fold(text).as_str() {
        "active" | "ativo" | "ativa" | "a" => Some(LicenseeStatus::Active),
        "inactive" | "inativo" | "inativa" | "cancelado" | "cancelada" | "i" => {
            Some(LicenseeStatus::Inactive)
        }
        "pending" | "pendente" | "em analise" | "p" => Some(LicenseeStatus::Pending),
        _ => None,
    }
}

pub fn parse_tier(text: &str) -> Option<GraduationTier> {
    match fold(text).as_str() {
        "consultant" | "consultor" | "consultora" => Some(GraduationTier::Consultant),
        "manager" | "gerente" => Some(GraduationTier::Manager),
        "executive" | "executivo" | "executiva" => Some(GraduationTier::Executive),
        "director" | "diretor" | "diretora" => Some(GraduationTier::Director),
        "shareholder" | "socio" | "socia" | "acionista" => Some(GraduationTier::Shareholder),
        _ => None,
    }
}

/// Spreadsheet serial day 0.
const SHEET_EPOCH: (i32, u32, u32) = (1899, 12, 30);

/// RFC 3339, `YYYY-MM-DD`, `DD/MM/YYYY`, or a spreadsheet serial day number.
pub fn parse_date(v: &Value) -> Option<DateTime<Utc>> {
    match v {
        Value::Number(n) => {
            let days = n.as_f64()?;
            if !(1.0..=2_958_465.0).contains(&days) {
                return None;
            }
            let (y, m, d) = SHEET_EPOCH;
            let epoch = NaiveDate::from_ymd_opt(y, m, d)?;
            let date = epoch.checked_add_signed(chrono::Duration::days(days.trunc() as i64))?;
            Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
        }
        Value::String(s) => {
            let t = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(t) {
                return Some(dt.with_timezone(&Utc));
            }
            ["%Y-%m-%d", "%d/%m/%Y"]
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(t, fmt).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|naive| Utc.from_utc_datetime(&naive))
        }
        _ => None,
    }
}
