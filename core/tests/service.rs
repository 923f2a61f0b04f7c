use chrono::{TimeZone, Utc};
use netdash_core::{
    chat::ReplySource,
    clock::ManualClock,
    config::DashConfig,
    error::{DashError, DashResult, ErrorKind},
    ingest::{IngestReport, Ingestor},
    record::{LicenseeRecord, LicenseeStatus},
    service::DashboardService,
    source::{InMemorySource, JsonFileSource, RecordSource},
    store::DashStore,
};
use serde_json::json;
use std::{cell::Cell, rc::Rc};

// ── Helpers ──────────────────────────────────────────────────────────────────

fn network() -> Vec<LicenseeRecord> {
    let mut records: Vec<LicenseeRecord> = (1..=6)
        .map(|c| LicenseeRecord::new(c, format!("L{c}"), if c == 1 { None } else { Some(c / 2) }))
        .collect();
    for (r, clients) in records.iter_mut().zip([40, 12, 8, 0, 2, 5]) {
        r.active_clients = clients;
    }
    records[3].status = LicenseeStatus::Inactive;
    records
}

fn clock() -> ManualClock {
    let _ = env_logger::builder().is_test(true).try_init();
    ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap())
}

fn loaded_service(clock: &ManualClock) -> DashboardService {
    let mut service = DashboardService::new(
        DashConfig::default_test(),
        Box::new(InMemorySource::from_records(network())),
    )
    .with_clock(Box::new(clock.clone()));
    service.reload().expect("in-memory load");
    service
}

/// Counts fetches and fails once `fail` is set.
struct FlakySource {
    fetches: Rc<Cell<usize>>,
    fail:    Rc<Cell<bool>>,
}

impl RecordSource for FlakySource {
    fn name(&self) -> String {
        "flaky".into()
    }

    fn fetch(&mut self, _ingestor: &Ingestor) -> DashResult<(Vec<LicenseeRecord>, IngestReport)> {
        self.fetches.set(self.fetches.get() + 1);
        if self.fail.get() {
            return Err(DashError::Upstream {
                source_name: "flaky".into(),
                message: "sheet unreachable".into(),
                retryable: true,
            });
        }
        Ok((network(), IngestReport::default()))
    }
}

// ── Hierarchy ────────────────────────────────────────────────────────────────

#[test]
fn tree_request_validates_root_and_depth() {
    let clock = clock();
    let mut service = loaded_service(&clock);

    let tree = service.network_tree(" 1 ", Some(1)).unwrap().expect("root 1 exists");
    assert_eq!(tree.child_codes(), vec![2, 3]);

    assert!(service.network_tree("999", None).unwrap().is_none(), "absent root is empty, not an error");

    let err = service.network_tree("abc", None).unwrap_err();
    assert!(matches!(err, DashError::InvalidRoot { .. }));
    assert_eq!(err.kind(), ErrorKind::Client);

    let err = service.network_tree("1", Some(65)).unwrap_err();
    assert!(matches!(err, DashError::InvalidParameter { .. }));
}

#[test]
fn licensee_detail_places_a_record_in_the_network() {
    let clock = clock();
    let mut service = loaded_service(&clock);

    let detail = service.licensee("5").unwrap().expect("code 5 exists");
    assert_eq!(detail.upline, vec![2, 1]);
    assert_eq!(detail.direct_recruits, 0);
    assert_eq!(detail.assessment.id, 5);

    let root = service.licensee("1").unwrap().unwrap();
    assert_eq!((root.direct_recruits, root.downline_size), (2, 5));
    assert!(service.licensee("77").unwrap().is_none());
}

// ── Metrics and cache ────────────────────────────────────────────────────────

#[test]
fn metrics_reject_unknown_fields_and_statuses() {
    let clock = clock();
    let mut service = loaded_service(&clock);

    assert!(matches!(
        service.metrics("happiness", None).unwrap_err(),
        DashError::InvalidField { .. }
    ));
    assert!(service.metrics("activeClients", Some("frozen")).is_err());

    let m = service.metrics("active_clients", Some("active")).unwrap();
    assert_eq!(m.count, 5);
    assert_eq!(m.sum, 67.0);
}

#[test]
fn repeated_requests_are_served_from_the_cache_until_ttl() {
    let clock = clock();
    let mut service = loaded_service(&clock);

    service.overview().unwrap();
    service.overview().unwrap();
    let stats = service.cache_stats();
    assert_eq!((stats.hits, stats.misses), (1, 1));

    clock.advance_secs(301);
    let o = service.overview().unwrap();
    assert_eq!(o.total, 6);
    assert_eq!(service.cache_stats().misses, 2, "stale snapshot reloads and recomputes");
}

#[test]
fn ranking_limits_are_bounded() {
    let clock = clock();
    let mut service = loaded_service(&clock);

    let top = service.ranking("active_clients", Some("desc"), Some(2)).unwrap();
    assert_eq!(top.iter().map(|e| e.code).collect::<Vec<_>>(), vec![1, 2]);
    assert_eq!(service.ranking("active_clients", None, None).unwrap().len(), 6);

    assert!(service.ranking("active_clients", None, Some(0)).is_err());
    assert!(service.ranking("active_clients", None, Some(101)).is_err());
    assert!(service.ranking("active_clients", Some("sideways"), None).is_err());
}

#[test]
fn risk_report_summarizes_everyone_and_truncates_the_list() {
    let clock = clock();
    let mut service = loaded_service(&clock);

    let report = service.risk_report(Some(2)).unwrap();
    assert_eq!(report.assessments.len(), 2);
    assert_eq!(report.summary.urgent + report.summary.monitor + report.summary.low_risk, 6);
    assert!(report.assessments[0].score >= report.assessments[1].score);
}

#[test]
fn breakdown_rejects_unknown_dimensions() {
    let clock = clock();
    let mut service = loaded_service(&clock);
    assert_eq!(service.breakdown("status").unwrap()[0].key, "active");
    assert!(service.breakdown("zodiac").is_err());
}

// ── Loading ──────────────────────────────────────────────────────────────────

#[test]
fn failed_refresh_keeps_serving_the_previous_snapshot() {
    let clock = clock();
    let fetches = Rc::new(Cell::new(0));
    let fail = Rc::new(Cell::new(false));
    let source = FlakySource { fetches: fetches.clone(), fail: fail.clone() };
    let mut service = DashboardService::new(DashConfig::default_test(), Box::new(source))
        .with_clock(Box::new(clock.clone()));

    assert_eq!(service.overview().unwrap().total, 6, "first request loads lazily");
    assert_eq!(fetches.get(), 1);

    fail.set(true);
    clock.advance_secs(600);
    assert_eq!(service.overview().unwrap().total, 6);
    assert_eq!(fetches.get(), 2, "a refresh was attempted");

    let err = service.reload().unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(err.kind(), ErrorKind::Upstream);
}

#[test]
fn failed_refresh_is_not_retried_until_the_backoff_passes() {
    let clock = clock();
    let fetches = Rc::new(Cell::new(0));
    let fail = Rc::new(Cell::new(false));
    let source = FlakySource { fetches: fetches.clone(), fail: fail.clone() };
    let mut service = DashboardService::new(DashConfig::default_test(), Box::new(source))
        .with_clock(Box::new(clock.clone()));
    service.overview().unwrap();
    assert_eq!(fetches.get(), 1);

    fail.set(true);
    clock.advance_secs(300);
    assert_eq!(service.overview().unwrap().total, 6);
    assert_eq!(fetches.get(), 2);

    // Within retry_after_secs (30 in the test config) the source is left alone.
    clock.advance_secs(10);
    service.overview().unwrap();
    service.metrics("active_clients", None).unwrap();
    assert_eq!(fetches.get(), 2);

    clock.advance_secs(20);
    service.overview().unwrap();
    assert_eq!(fetches.get(), 3, "retried once the backoff elapsed");

    fail.set(false);
    clock.advance_secs(30);
    service.overview().unwrap();
    assert_eq!(fetches.get(), 4);
    clock.advance_secs(1);
    service.overview().unwrap();
    assert_eq!(fetches.get(), 4, "a fresh snapshot needs no fetch");
}

#[test]
fn source_failure_without_any_data_is_an_upstream_error() {
    let clock = clock();
    let source = FlakySource { fetches: Rc::new(Cell::new(0)), fail: Rc::new(Cell::new(true)) };
    let mut service = DashboardService::new(DashConfig::default_test(), Box::new(source))
        .with_clock(Box::new(clock.clone()));

    let err = service.overview().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Upstream);
    assert!(matches!(service.records(), Err(DashError::DataUnavailable)));

    let reply = service.chat("quantos ativos?", None);
    assert_eq!(reply.source, ReplySource::Unavailable);
}

#[test]
fn missing_file_is_a_retryable_upstream_error() {
    let mut service = DashboardService::new(
        DashConfig::default_test(),
        Box::new(JsonFileSource::new("/nonexistent/licensees.json")),
    );
    let err = service.reload().unwrap_err();
    assert!(matches!(err, DashError::Upstream { retryable: true, .. }), "got {err:?}");
}

#[test]
fn raw_payloads_go_through_ingestion() {
    let payload = json!([
        { "Código": 1, "Nome": "Ana", "Status": "Ativo", "Clientes Ativos": 10 },
        { "Código": 2, "Nome": "Bia", "Status": "Ativo", "Patrocinador": 1 },
        { "Código": 2, "Nome": "Bia de novo" }
    ]);
    let mut service = DashboardService::new(
        DashConfig::default_test(),
        Box::new(InMemorySource::from_payload(payload)),
    );
    let load = service.reload().unwrap();
    assert_eq!(load.report.duplicate_codes, vec![2]);
    assert_eq!(service.records().unwrap().len(), 2);
}

#[test]
fn store_receives_synced_network_and_events() {
    let clock = clock();
    let store = DashStore::in_memory().unwrap();
    store.migrate().unwrap();

    let mut service = DashboardService::new(
        DashConfig::default_test(),
        Box::new(InMemorySource::from_records(network())),
    )
    .with_clock(Box::new(clock.clone()))
    .with_store(store);

    let batch_id = service.reload().unwrap().batch_id.clone().expect("store assigns a batch");
    service.chat("Quantos licenciados estão ativos?", None);

    let store = service.store().unwrap();
    assert_eq!(store.licensee_count().unwrap(), 6);
    assert_eq!(store.latest_ingest_batch().unwrap().unwrap().batch_id, batch_id);
    assert_eq!(store.events_of_type("records_loaded").unwrap().len(), 1);
    let chats = store.events_of_type("chat_answered").unwrap();
    assert!(chats[0].payload.contains("active_count"), "{}", chats[0].payload);
}
