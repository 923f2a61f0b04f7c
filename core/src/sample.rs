//! Deterministic synthetic licensee networks.
//!
//! Used by the runner's `--generate` mode and by tests that need a
//! realistically shaped population. Same seed + same params = same network.
//!
//! RULES:
//!   - Codes start at `first_code` and increase in source order.
//!   - A sponsor always appears earlier in the list than its recruits, so
//!     generated networks are acyclic and every sponsor resolves.
//!   - Tiers follow recruit counts; activation dates follow the sponsor's.

use crate::{
    hierarchy::direct_recruit_counts,
    record::{GraduationTier, LicenseeRecord, LicenseeStatus},
    rng::{RngStream, SampleRng},
    types::Code,
};
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq)]
pub struct SampleParams {
    pub size:          usize,
    /// Records with no sponsor. At least one when `size > 0`.
    pub roots:         usize,
    pub first_code:    Code,
    pub inactive_rate: f64,
    pub pending_rate:  f64,
    /// Share of licensees with any telecom clients.
    pub telecom_rate:  f64,
    /// Pareto shape for active clients; lower = heavier tail.
    pub clients_alpha: f64,
}

impl Default for SampleParams {
    fn default() -> Self {
        Self {
            size: 250,
            roots: 3,
            first_code: 100_001,
            inactive_rate: 0.18,
            pending_rate: 0.06,
            telecom_rate: 0.55,
            clients_alpha: 1.4,
        }
    }
}

const FIRST_NAMES: &[&str] = &[
    "Ana", "Bruno", "Camila", "Diego", "Eduarda", "Felipe", "Gabriela", "Heitor",
    "Isabela", "João", "Larissa", "Lucas", "Mariana", "Mateus", "Natália", "Otávio",
    "Paula", "Rafael", "Renata", "Samuel", "Tatiane", "Thiago", "Vanessa", "Vinícius",
];

const LAST_NAMES: &[&str] = &[
    "Almeida", "Barbosa", "Cardoso", "Costa", "Ferreira", "Gomes", "Lima", "Martins",
    "Melo", "Oliveira", "Pereira", "Ribeiro", "Rocha", "Santos", "Silva", "Souza",
];

/// (city, state code, relative weight)
const PLACES: &[(&str, &str, f64)] = &[
    ("São Paulo",      "SP", 6.0),
    ("Campinas",       "SP", 2.0),
    ("Rio de Janeiro", "RJ", 4.0),
    ("Belo Horizonte", "MG", 3.0),
    ("Curitiba",       "PR", 2.0),
    ("Porto Alegre",   "RS", 2.0),
    ("Florianópolis",  "SC", 1.0),
    ("Salvador",       "BA", 2.0),
    ("Recife",         "PE", 1.5),
    ("Fortaleza",      "CE", 1.5),
    ("Goiânia",        "GO", 1.0),
    ("Manaus",         "AM", 0.5),
];

/// 2019-01-01, the earliest generated activation.
fn network_start() -> Option<DateTime<Utc>> {
    let date = NaiveDate::from_ymd_opt(2019, 1, 1)?.and_hms_opt(0, 0, 0)?;
    Some(Utc.from_utc_datetime(&date))
}

pub fn generate_network(params: &SampleParams, seed: u64) -> Vec<LicenseeRecord> {
    let mut topology = SampleRng::new(seed, RngStream::Topology);
    let mut status_rng = SampleRng::new(seed, RngStream::Status);
    let mut clients_rng = SampleRng::new(seed, RngStream::Clients);
    let mut attrs = SampleRng::new(seed, RngStream::Attributes);

    let roots = params.roots.clamp(1, params.size.max(1));
    let start = network_start();
    let place_weights: Vec<f64> = PLACES.iter().map(|p| p.2).collect();
    let mut records: Vec<LicenseeRecord> = Vec::with_capacity(params.size);

    for i in 0..params.size {
        let code = params.first_code + i as Code;

        let sponsor_idx = if i < roots {
            None
        } else {
            // Recent joiners recruit more: half the draws come from the
            // newest quarter of the network.
            let window = if topology.chance(0.5) { (i / 4).max(1) } else { i };
            Some(i - 1 - topology.next_u64_below(window as u64) as usize)
        };

        let name = format!(
            "{} {}",
            attrs.pick(FIRST_NAMES),
            attrs.pick(LAST_NAMES)
        );
        let mut record = LicenseeRecord::new(code, name, sponsor_idx.map(|s| records[s].code));

        let (city, state, _) = PLACES[attrs.weighted_index(&place_weights)];
        // Recruits usually share their sponsor's region.
        match sponsor_idx {
            Some(s) if attrs.chance(0.6) => {
                record.city = records[s].city.clone();
                record.state_code = records[s].state_code.clone();
            }
            _ => {
                record.city = city.to_string();
                record.state_code = state.to_string();
            }
        }

        let roll = status_rng.next_f64();
        record.status = if roll < params.pending_rate {
            LicenseeStatus::Pending
        } else if roll < params.pending_rate + params.inactive_rate {
            LicenseeStatus::Inactive
        } else {
            LicenseeStatus::Active
        };

        // pareto(1, a) >= 1, so subtracting one lets zero-client licensees occur.
        let clients = (clients_rng.pareto(1.0, params.clients_alpha).floor() as u64).saturating_sub(1);
        record.active_clients = match record.status {
            LicenseeStatus::Active   => clients.min(500),
            LicenseeStatus::Inactive => clients.min(500) / 4,
            LicenseeStatus::Pending  => 0,
        };
        record.telecom_clients = if clients_rng.chance(params.telecom_rate) {
            (clients_rng.pareto(1.0, 2.0).floor() as u64).min(200)
        } else {
            0
        };

        let base = match sponsor_idx {
            Some(s) => records[s].activation_date,
            None => start,
        };
        record.activation_date = base.map(|d| {
            let spread = if sponsor_idx.is_some() { 240 } else { 60 };
            d + Duration::days(attrs.next_u64_below(spread) as i64)
        });

        records.push(record);
    }

    assign_tiers(&mut records, &mut attrs);
    log::info!(
        "sample: seed={seed} generated {} licensees under {roots} roots",
        records.len()
    );
    records
}

fn assign_tiers(records: &mut [LicenseeRecord], rng: &mut SampleRng) {
    let recruits = direct_recruit_counts(records);
    for record in records.iter_mut() {
        let n = recruits.get(&record.code).copied().unwrap_or(0);
        let earned = match n {
            0     => 0,
            1..=2 => 1,
            3..=5 => 2,
            6..=9 => 3,
            _     => 4,
        };
        // Some licensees have not graduated to the tier their team supports.
        let tier = if earned > 0 && rng.chance(0.2) { earned - 1 } else { earned };
        record.graduation_tier = GraduationTier::ALL[tier];
    }
}

/// Rows as a spreadsheet export would carry them: Portuguese headers,
/// localized status and tier labels, `DD/MM/YYYY` dates.
pub fn to_sheet_rows(records: &[LicenseeRecord]) -> Value {
    let rows: Vec<Value> = records
        .iter()
        .map(|r| {
            json!({
                "Código":           r.code,
                "Nome":             r.name,
                "Status":           status_label(r.status),
                "Clientes Ativos":  r.active_clients,
                "Clientes Telecom": r.telecom_clients,
                "Graduação":        tier_label(r.graduation_tier),
                "Patrocinador":     r.sponsor_code.unwrap_or(0),
                "Cidade":           r.city,
                "UF":               r.state_code,
                "Data Ativação":    r.activation_date.map(|d| d.format("%d/%m/%Y").to_string()),
            })
        })
        .collect();
    Value::Array(rows)
}

fn status_label(status: LicenseeStatus) -> &'static str {
    match status {
        LicenseeStatus::Active   => "Ativo",
        LicenseeStatus::Inactive => "Inativo",
        LicenseeStatus::Pending  => "Pendente",
    }
}

fn tier_label(tier: GraduationTier) -> &'static str {
    match tier {
        GraduationTier::Consultant  => "Consultor",
        GraduationTier::Manager     => "Gerente",
        GraduationTier::Executive   => "Executivo",
        GraduationTier::Director    => "Diretor",
        GraduationTier::Shareholder => "Sócio",
    }
}
