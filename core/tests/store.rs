use chrono::{TimeZone, Utc};
use netdash_core::{
    event::DashEvent,
    ingest::IngestReport,
    record::{GraduationTier, LicenseeRecord, LicenseeStatus, SortDirection},
    store::{DashStore, LicenseeQuery, LicenseeSort},
};

// ── Helpers ──────────────────────────────────────────────────────────────────

fn store() -> DashStore {
    let store = DashStore::in_memory().expect("in-memory store");
    store.migrate().expect("migration");
    store
}

fn licensee(code: u64, active: u64, status: LicenseeStatus, uf: &str) -> LicenseeRecord {
    let mut r = LicenseeRecord::new(code, format!("L{code}"), None);
    r.active_clients = active;
    r.status = status;
    r.state_code = uf.to_string();
    r
}

fn network() -> Vec<LicenseeRecord> {
    let mut records = vec![
        licensee(30, 5, LicenseeStatus::Active, "SP"),
        licensee(10, 9, LicenseeStatus::Inactive, "RJ"),
        licensee(20, 1, LicenseeStatus::Active, "SP"),
        licensee(40, 7, LicenseeStatus::Pending, "MG"),
    ];
    records[1].sponsor_code = Some(30);
    records[2].sponsor_code = Some(30);
    records
}

// ── Licensees ────────────────────────────────────────────────────────────────

#[test]
fn migrations_are_idempotent() {
    let s = store();
    s.migrate().expect("second migration run");
    assert_eq!(s.licensee_count().unwrap(), 0);
}

#[test]
fn record_round_trips_through_sqlite() {
    let s = store();
    let mut r = licensee(7, 12, LicenseeStatus::Pending, "PR");
    r.telecom_clients = 3;
    r.graduation_tier = GraduationTier::Executive;
    r.sponsor_code = Some(1);
    r.city = "Curitiba".into();
    r.activation_date = Utc.with_ymd_and_hms(2020, 2, 29, 0, 0, 0).single();

    s.upsert_licensee(&r).unwrap();
    assert_eq!(s.get_licensee(7).unwrap(), Some(r));
    assert_eq!(s.get_licensee(8).unwrap(), None);
}

#[test]
fn upsert_updates_in_place_and_keeps_position() {
    let s = store();
    s.replace_licensees(&network()).unwrap();

    let mut changed = licensee(10, 99, LicenseeStatus::Active, "RJ");
    changed.name = "renamed".into();
    s.upsert_licensee(&changed).unwrap();
    s.upsert_licensee(&licensee(50, 0, LicenseeStatus::Active, "BA")).unwrap();

    let codes: Vec<u64> = s.all_licensees().unwrap().iter().map(|r| r.code).collect();
    assert_eq!(codes, vec![30, 10, 20, 40, 50]);
    assert_eq!(s.get_licensee(10).unwrap().unwrap().name, "renamed");
}

#[test]
fn replace_keeps_source_order_and_first_duplicate() {
    let s = store();
    let mut records = network();
    records.push(licensee(30, 0, LicenseeStatus::Inactive, "AM"));

    assert_eq!(s.replace_licensees(&records).unwrap(), 4);
    let stored = s.all_licensees().unwrap();
    assert_eq!(stored.iter().map(|r| r.code).collect::<Vec<_>>(), vec![30, 10, 20, 40]);
    assert_eq!(stored[0].state_code, "SP");
}

#[test]
fn list_filters_sorts_and_pages() {
    let s = store();
    s.replace_licensees(&network()).unwrap();

    let active_sp = s
        .list_licensees(&LicenseeQuery {
            status: Some(LicenseeStatus::Active),
            state_code: Some("SP".into()),
            ..LicenseeQuery::default()
        })
        .unwrap();
    assert_eq!(active_sp.total, 2);
    assert_eq!(active_sp.items.iter().map(|r| r.code).collect::<Vec<_>>(), vec![30, 20]);

    let by_clients = s
        .list_licensees(&LicenseeQuery {
            sort: LicenseeSort::ActiveClients,
            direction: SortDirection::Descending,
            limit: 2,
            offset: 1,
            ..LicenseeQuery::default()
        })
        .unwrap();
    assert_eq!(by_clients.total, 4);
    assert_eq!(by_clients.items.iter().map(|r| r.code).collect::<Vec<_>>(), vec![40, 30]);

    assert!("nope".parse::<LicenseeSort>().is_err());
}

#[test]
fn counts_by_status_include_empty_statuses() {
    let s = store();
    s.replace_licensees(&network()[..3]).unwrap();
    let counts = s.count_by_status().unwrap();
    assert_eq!(counts[&LicenseeStatus::Active], 2);
    assert_eq!(counts[&LicenseeStatus::Inactive], 1);
    assert_eq!(counts[&LicenseeStatus::Pending], 0);
}

#[test]
fn delete_reports_whether_a_row_went_away() {
    let s = store();
    s.replace_licensees(&network()).unwrap();
    assert!(s.delete_licensee(20).unwrap());
    assert!(!s.delete_licensee(20).unwrap());
    assert_eq!(s.licensee_count().unwrap(), 3);
}

// ── Batches and events ───────────────────────────────────────────────────────

#[test]
fn sync_network_writes_records_and_batch_together() {
    let s = store();
    let loaded_at = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();
    let report = IngestReport {
        rows_seen: 6,
        accepted: 4,
        duplicate_codes: vec![30],
        unmapped_headers: vec!["Obs".into()],
        ..IngestReport::default()
    };

    let batch_id = s.sync_network("test", &network(), &report, loaded_at).unwrap();
    assert_eq!(batch_id.len(), 36, "uuid v4 text form");

    let batch = s.get_ingest_batch(&batch_id).unwrap().expect("batch stored");
    assert_eq!(batch.source, "test");
    assert_eq!(batch.loaded_at, loaded_at);
    assert_eq!((batch.rows_seen, batch.accepted, batch.duplicates), (6, 4, 1));
    assert_eq!(batch.unmapped_headers, vec!["Obs".to_string()]);
    assert_eq!(s.latest_ingest_batch().unwrap().map(|b| b.batch_id), Some(batch_id));
    assert_eq!(s.licensee_count().unwrap(), 4);
}

#[test]
fn events_are_stored_as_tagged_json() {
    let s = store();
    let at = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();
    let event = DashEvent::CacheInvalidated { entries: 3 };

    s.record_event(&event, at).unwrap();
    s.record_event(&DashEvent::OrphansDetected { count: 1, codes: vec![9] }, at).unwrap();

    let stored = s.events_of_type("cache_invalidated").unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].occurred_at, at);
    assert!(stored[0].payload.contains("\"type\":\"cache_invalidated\""));
    assert_eq!(stored[0].event().unwrap(), event);

    let recent = s.recent_events(10).unwrap();
    assert_eq!(recent[0].event_type, "orphans_detected", "newest first");
}
