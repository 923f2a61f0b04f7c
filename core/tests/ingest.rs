use chrono::{Datelike, TimeZone, Utc};
use netdash_core::{
    config::IngestConfig,
    error::DashError,
    ingest::{parse_count, parse_date, CanonicalField, Ingestor, MAX_COUNT},
    metrics,
    record::{GraduationTier, LicenseeStatus},
    store::DashStore,
};
use serde_json::json;

// ── Helpers ──────────────────────────────────────────────────────────────────

fn ingestor() -> Ingestor {
    Ingestor::new(&IngestConfig::default())
}

// ── Header mapping ───────────────────────────────────────────────────────────

#[test]
fn header_aliases_resolve_regardless_of_case_and_accents() {
    let ing = ingestor();
    let map = ing.field_map();
    assert_eq!(map.resolve("Código"), Some(CanonicalField::Code));
    assert_eq!(map.resolve("CLIENTES ATIVOS"), Some(CanonicalField::ActiveClients));
    assert_eq!(map.resolve("activeClients"), Some(CanonicalField::ActiveClients));
    assert_eq!(map.resolve("sponsor_id"), Some(CanonicalField::SponsorCode));
    assert_eq!(map.resolve("Data de Ativação"), Some(CanonicalField::ActivationDate));
    assert_eq!(map.resolve("observações"), None);
}

#[test]
fn object_rows_normalize_into_canonical_records() {
    let payload = json!([
        {
            "Código": 1001, "Nome": "Marina", "Status": "Ativo",
            "Clientes Ativos": "1.234", "Clientes Telecom": 7,
            "Graduação": "Sócio", "Patrocinador": 0,
            "Cidade": "São Paulo", "UF": "sp", "Data Ativação": "15/03/2019",
            "Observações": "vip"
        },
        {
            "codigo": "1002", "nome": "Carlos", "situacao": "inativo",
            "ativos": 3, "graduacao": "gerente", "patrocinador": "1001"
        }
    ]);
    let (records, report) = ingestor().normalize_json(&payload).unwrap();

    assert_eq!(report.rows_seen, 2);
    assert_eq!(report.accepted, 2);
    assert_eq!(report.unmapped_headers, vec!["Observações".to_string()]);

    let m = &records[0];
    assert_eq!(m.code, 1001);
    assert_eq!(m.status, LicenseeStatus::Active);
    assert_eq!(m.active_clients, 1234);
    assert_eq!(m.telecom_clients, 7);
    assert_eq!(m.graduation_tier, GraduationTier::Shareholder);
    assert_eq!(m.sponsor_code, None, "0 marks a top-of-network record");
    assert_eq!(m.state_code, "SP");
    assert_eq!(m.activation_date, Utc.with_ymd_and_hms(2019, 3, 15, 0, 0, 0).single());

    let c = &records[1];
    assert_eq!(c.status, LicenseeStatus::Inactive);
    assert_eq!(c.sponsor_code, Some(1001));
    assert_eq!(c.graduation_tier, GraduationTier::Manager);
    assert_eq!(c.telecom_clients, 0);
}

#[test]
fn value_grid_uses_the_first_row_as_headers() {
    let payload = json!({
        "values": [
            ["Código", "Nome", "Status", "Patrocinador"],
            ["1", "Ana", "Ativo", "-"],
            ["2", "Bruno", "Pendente", "1"],
            ["3", "Caio"]
        ]
    });
    let (records, report) = ingestor().normalize_json(&payload).unwrap();

    assert_eq!(records.len(), 3);
    assert_eq!(records[0].sponsor_code, None);
    assert_eq!(records[1].sponsor_code, Some(1));
    assert_eq!(records[1].status, LicenseeStatus::Pending);
    // Short rows fill the missing cells with defaults.
    assert_eq!(records[2].status, LicenseeStatus::Pending);
    assert!(report.cell_warnings >= 1);
}

#[test]
fn grid_without_a_code_column_is_rejected() {
    let payload = json!([["Nome", "Status"], ["Ana", "Ativo"]]);
    let err = ingestor().normalize_json(&payload).unwrap_err();
    assert!(matches!(err, DashError::InvalidParameter { .. }), "got {err:?}");
}

// ── Row-level problems ───────────────────────────────────────────────────────

#[test]
fn bad_rows_are_reported_not_fatal() {
    let rows = vec![
        json!({ "code": 0, "name": "reserved" }),
        json!({ "name": "no code" }),
        json!({ "code": "abc", "name": "garbage" }),
        json!({ "code": 5, "name": "ok", "status": "active" }),
        json!("not an object"),
    ];
    let (records, report) = ingestor().normalize_rows(&rows);

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].code, 5);
    assert_eq!(report.rows_seen, 5);
    let rejected_rows: Vec<usize> = report.rejected.iter().map(|r| r.row).collect();
    assert_eq!(rejected_rows, vec![0, 1, 2, 4]);
}

#[test]
fn duplicate_codes_keep_the_first_row() {
    let rows = vec![
        json!({ "code": 7, "name": "first" }),
        json!({ "code": 8, "name": "other" }),
        json!({ "code": "7", "name": "second" }),
    ];
    let (records, report) = ingestor().normalize_rows(&rows);

    assert_eq!(records.len(), 2);
    assert_eq!(records[0].name, "first");
    assert_eq!(report.duplicate_codes, vec![7]);
}

#[test]
fn unknown_status_falls_back_to_pending_with_a_warning() {
    let rows = vec![json!({ "code": 1, "status": "suspenso" })];
    let (records, report) = ingestor().normalize_rows(&rows);
    assert_eq!(records[0].status, LicenseeStatus::Pending);
    assert_eq!(records[0].name, "#1");
    assert_eq!(report.cell_warnings, 1);
}

#[test]
fn custom_sentinels_mark_missing_sponsors() {
    let mut config = IngestConfig::default();
    config.root_sentinels.push("sem patrocinador".into());
    let rows = vec![json!({ "code": 1, "patrocinador": "Sem Patrocinador" })];
    let (records, report) = Ingestor::new(&config).normalize_rows(&rows);
    assert_eq!(records[0].sponsor_code, None);
    assert_eq!(report.cell_warnings, 0);
}

// ── Cell parsers ─────────────────────────────────────────────────────────────

#[test]
fn counts_accept_numbers_and_localized_strings() {
    assert_eq!(parse_count(&json!(12)), Some(12));
    assert_eq!(parse_count(&json!(" 40 ")), Some(40));
    assert_eq!(parse_count(&json!("12.345")), Some(12_345));
    assert_eq!(parse_count(&json!("3,7")), Some(3));
    assert_eq!(parse_count(&json!("-2")), None);
    assert_eq!(parse_count(&json!("muitos")), None);
}

#[test]
fn dates_accept_serials_iso_and_brazilian_formats() {
    let serial = parse_date(&json!(43831)).unwrap();
    assert_eq!((serial.year(), serial.month(), serial.day()), (2020, 1, 1));

    let iso = parse_date(&json!("2021-07-09")).unwrap();
    assert_eq!((iso.year(), iso.month(), iso.day()), (2021, 7, 9));

    let br = parse_date(&json!("09/07/2021")).unwrap();
    assert_eq!(br, iso);

    let rfc = parse_date(&json!("2021-07-09T12:30:00-03:00")).unwrap();
    assert_eq!(rfc, Utc.with_ymd_and_hms(2021, 7, 9, 15, 30, 0).unwrap());

    assert!(parse_date(&json!("ontem")).is_none());
    assert!(parse_date(&json!(0)).is_none());
}

#[test]
fn oversized_counts_are_clamped_and_survive_downstream() {
    let rows = vec![json!({
        "Código": 1, "Nome": "Big", "Status": "Ativo",
        "Clientes Ativos": "18446744073709551615", "Clientes Telecom": 1
    })];
    let (records, report) = ingestor().normalize_rows(&rows);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].active_clients, MAX_COUNT);
    assert_eq!(report.cell_warnings, 1);

    assert_eq!(records[0].total_clients(), MAX_COUNT + 1);
    let overview = metrics::overview(&records);
    assert_eq!(overview.total_active_clients, MAX_COUNT);

    let store = DashStore::in_memory().unwrap();
    store.migrate().unwrap();
    store.upsert_licensee(&records[0]).unwrap();
    let back = store.get_licensee(1).unwrap().expect("stored");
    assert_eq!(back.active_clients, MAX_COUNT);
}

