//! Dashboard service: the request-level entry point.
//!
//! Owns the loaded record snapshot, the metrics cache and the optional
//! store. Every operation validates its raw parameters, serves from the
//! cache where it can, and reports malformed input as a client error.
//!
//! RULES:
//!   - The snapshot is replaced only by a complete successful fetch. A
//!     failed refresh keeps serving the previous snapshot.
//!   - A snapshot older than the cache TTL is refreshed before use.
//!   - After a failed refresh the source is not retried for
//!     `retry_after_secs`; the previous snapshot is served meanwhile.
//!     An explicit `reload` always goes to the source.
//!   - Nothing loaded and the source failing → the source's error; chat
//!     answers with its configured "unavailable" message instead.
//!   - Event log writes never fail a request.

use crate::{
    cache::{CacheStats, MetricsCache},
    chat::{ChatReply, ChatResponder, LanguageModel},
    clock::{Clock, SystemClock},
    config::DashConfig,
    error::{DashError, DashResult},
    event::DashEvent,
    hierarchy::{Forest, HierarchyBuilder, HierarchyNode},
    ingest::{IngestReport, Ingestor},
    insight::{summarize, InsightClassifier, RiskAssessment, RiskSummary},
    metrics::{self, AggregatedMetrics, BreakdownKey, BreakdownRow, NetworkOverview, RankedEntry},
    record::{LicenseeRecord, LicenseeStatus, NumericField, SortDirection},
    source::RecordSource,
    store::DashStore,
    types::{BatchId, Code},
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskReport {
    pub summary:     RiskSummary,
    /// Highest score first, cut to the requested limit.
    pub assessments: Vec<RiskAssessment>,
}

/// One licensee with its position in the network.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LicenseeDetail {
    pub record:          LicenseeRecord,
    /// Sponsor first, top of the network last.
    pub upline:          Vec<Code>,
    pub direct_recruits: usize,
    pub downline_size:   usize,
    pub assessment:      RiskAssessment,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LoadSummary {
    pub source:    String,
    pub loaded_at: DateTime<Utc>,
    pub batch_id:  Option<BatchId>,
    pub report:    IngestReport,
}

pub struct DashboardService {
    config:     DashConfig,
    ingestor:   Ingestor,
    source:     Box<dyn RecordSource>,
    clock:      Box<dyn Clock>,
    cache:      MetricsCache,
    classifier: InsightClassifier,
    responder:  ChatResponder,
    store:      Option<DashStore>,
    records:    Option<Vec<LicenseeRecord>>,
    last_load:  Option<LoadSummary>,
    /// Time of the latest failed fetch since the last success.
    last_failure: Option<DateTime<Utc>>,
}

impl DashboardService {
    pub fn new(config: DashConfig, source: Box<dyn RecordSource>) -> Self {
        Self {
            ingestor: Ingestor::new(&config.ingest),
            cache: MetricsCache::from_config(&config.cache),
            classifier: InsightClassifier::new(config.risk.clone()),
            responder: ChatResponder::new(
                config.chat.clone(),
                InsightClassifier::new(config.risk.clone()),
            ),
            config,
            source,
            clock: Box::new(SystemClock),
            store: None,
            records: None,
            last_load: None,
            last_failure: None,
        }
    }

    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sync every successful load into `store` and log events there.
    pub fn with_store(mut self, store: DashStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> &DashConfig {
        &self.config
    }

    pub fn store(&self) -> Option<&DashStore> {
        self.store.as_ref()
    }

    pub fn last_load(&self) -> Option<&LoadSummary> {
        self.last_load.as_ref()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// The current snapshot.
    pub fn records(&self) -> DashResult<&[LicenseeRecord]> {
        self.records.as_deref().ok_or(DashError::DataUnavailable)
    }

    // ── Loading ────────────────────────────────────────────────

    /// Fetch from the source and replace the snapshot. On failure the
    /// previous snapshot stays in place and the error is returned.
    pub fn reload(&mut self) -> DashResult<&LoadSummary> {
        let now = self.clock.now();
        let source_name = self.source.name();

        let (records, report) = match self.source.fetch(&self.ingestor) {
            Ok(fetched) => fetched,
            Err(e) => {
                log::warn!("service: source={source_name} fetch failed: {e}");
                self.last_failure = Some(now);
                self.record_event(DashEvent::SourceFailed {
                    source: source_name,
                    message: e.to_string(),
                });
                return Err(e);
            }
        };

        let batch_id = match &self.store {
            Some(store) => match store.sync_network(&source_name, &records, &report, now) {
                Ok(id) => Some(id),
                Err(e) => {
                    log::warn!("service: store sync failed: {e}");
                    None
                }
            },
            None => None,
        };

        let orphans = HierarchyBuilder::new(&records).orphans();
        log::info!(
            "service: source={source_name} loaded {} records ({} orphans)",
            records.len(),
            orphans.len()
        );

        self.record_event(DashEvent::RecordsLoaded {
            source: source_name.clone(),
            accepted: report.accepted,
            rejected: report.rejected.len(),
            duplicates: report.duplicate_codes.len(),
            batch_id: batch_id.clone(),
        });
        if !orphans.is_empty() {
            self.record_event(DashEvent::OrphansDetected { count: orphans.len(), codes: orphans });
        }

        self.invalidate_cache();
        self.records = Some(records);
        self.last_failure = None;
        Ok(&*self.last_load.insert(LoadSummary {
            source: source_name,
            loaded_at: now,
            batch_id,
            report,
        }))
    }

    /// Refresh a stale snapshot. Errors only when there is nothing to
    /// fall back on.
    fn ensure_fresh(&mut self) -> DashResult<()> {
        let now = self.clock.now();
        let stale = match &self.last_load {
            None => true,
            Some(load) => now.signed_duration_since(load.loaded_at) >= self.cache.ttl(),
        };
        if !stale {
            return Ok(());
        }
        let backing_off = self.records.is_some()
            && self.last_failure.is_some_and(|at| {
                now.signed_duration_since(at) < Duration::seconds(self.retry_after_secs())
            });
        if backing_off {
            log::debug!("service: refresh skipped, last failure too recent");
            return Ok(());
        }
        let refreshed = self.reload().map(|_| ());
        match refreshed {
            Err(e) if self.records.is_some() => {
                log::warn!("service: refresh failed, serving previous snapshot: {e}");
                Ok(())
            }
            other => other,
        }
    }

    fn retry_after_secs(&self) -> i64 {
        i64::try_from(self.config.cache.retry_after_secs)
            .unwrap_or(i64::MAX)
            .min(i64::MAX / 1_000)
    }

    pub fn invalidate_cache(&mut self) {
        let entries = self.cache.stats().entries;
        self.cache.invalidate_all();
        if entries > 0 {
            self.record_event(DashEvent::CacheInvalidated { entries });
        }
    }

    // ── Hierarchy ──────────────────────────────────────────────

    /// Tree under `root_raw`. A malformed id is a client error; a well-formed
    /// id that is not in the data yields `Ok(None)`.
    pub fn network_tree(
        &mut self,
        root_raw: &str,
        depth: Option<usize>,
    ) -> DashResult<Option<HierarchyNode>> {
        let root = parse_code(root_raw)?;
        let depth = self.resolve_depth(depth)?;
        self.ensure_fresh()?;
        let records = self.records()?;
        Ok(HierarchyBuilder::new(records).build(root, depth))
    }

    pub fn forest(&mut self, depth: Option<usize>) -> DashResult<Forest> {
        let depth = self.resolve_depth(depth)?;
        self.ensure_fresh()?;
        Ok(HierarchyBuilder::new(self.records()?).forest(depth))
    }

    pub fn licensee(&mut self, code_raw: &str) -> DashResult<Option<LicenseeDetail>> {
        let code = parse_code(code_raw)?;
        self.ensure_fresh()?;
        let records = self.records()?;
        let builder = HierarchyBuilder::new(records);
        let Some(record) = builder.record(code) else {
            return Ok(None);
        };

        let recruits = builder.direct_recruit_counts();
        let population =
            metrics::quartiles(&metrics::field_values(records, NumericField::ActiveClients));
        let direct = recruits.get(&code).copied().unwrap_or(0);
        Ok(Some(LicenseeDetail {
            record: record.clone(),
            upline: builder.ancestors(code),
            direct_recruits: direct,
            downline_size: builder.downline(code).len(),
            assessment: self.classifier.classify(record, direct, &population),
        }))
    }

    fn resolve_depth(&self, depth: Option<usize>) -> DashResult<Option<usize>> {
        let limit = self.config.hierarchy.max_depth_limit;
        match depth {
            Some(d) if d > limit => Err(DashError::invalid_parameter(
                "depth",
                format!("{d} exceeds the limit of {limit}"),
            )),
            Some(d) => Ok(Some(d)),
            None => Ok(self.config.hierarchy.default_max_depth),
        }
    }

    // ── Metrics ────────────────────────────────────────────────

    pub fn overview(&mut self) -> DashResult<NetworkOverview> {
        self.ensure_fresh()?;
        let now = self.clock.now();
        let records = self.records.as_deref().ok_or(DashError::DataUnavailable)?;
        self.cache
            .get_or_compute("overview", now, || Ok(metrics::overview(records)))
    }

    pub fn metrics(&mut self, field: &str, status: Option<&str>) -> DashResult<AggregatedMetrics> {
        let field: NumericField = field.parse()?;
        let status: Option<LicenseeStatus> = status.map(str::parse).transpose()?;
        self.ensure_fresh()?;

        let key = format!(
            "metrics:{}:{}",
            field.as_str(),
            status.map_or("all", |s| s.as_str())
        );
        let now = self.clock.now();
        let records = self.records.as_deref().ok_or(DashError::DataUnavailable)?;
        self.cache
            .get_or_compute(&key, now, || Ok(metrics::aggregate(records, field, status)))
    }

    pub fn ranking(
        &mut self,
        field: &str,
        direction: Option<&str>,
        limit: Option<usize>,
    ) -> DashResult<Vec<RankedEntry>> {
        let field: NumericField = field.parse()?;
        let direction: SortDirection = direction.map(str::parse::<SortDirection>).transpose()?.unwrap_or_default();
        let limit = self.resolve_limit(limit)?;
        self.ensure_fresh()?;

        let key = format!("ranking:{}:{direction:?}:{limit}", field.as_str());
        let now = self.clock.now();
        let records = self.records.as_deref().ok_or(DashError::DataUnavailable)?;
        self.cache
            .get_or_compute(&key, now, || Ok(metrics::rank(records, field, direction, limit)))
    }

    pub fn breakdown(&mut self, by: &str) -> DashResult<Vec<BreakdownRow>> {
        let by: BreakdownKey = by.parse()?;
        self.ensure_fresh()?;

        let key = format!("breakdown:{by:?}");
        let now = self.clock.now();
        let records = self.records.as_deref().ok_or(DashError::DataUnavailable)?;
        self.cache
            .get_or_compute(&key, now, || Ok(metrics::breakdown(records, by)))
    }

    fn resolve_limit(&self, limit: Option<usize>) -> DashResult<usize> {
        let max = self.config.ranking.max_limit;
        match limit {
            None => Ok(self.config.ranking.default_limit),
            Some(0) => Err(DashError::invalid_parameter("limit", "must be at least 1")),
            Some(n) if n > max => Err(DashError::invalid_parameter(
                "limit",
                format!("{n} exceeds the maximum of {max}"),
            )),
            Some(n) => Ok(n),
        }
    }

    // ── Insight ────────────────────────────────────────────────

    pub fn risk_report(&mut self, limit: Option<usize>) -> DashResult<RiskReport> {
        let limit = self.resolve_limit(limit)?;
        self.ensure_fresh()?;

        let now = self.clock.now();
        let records = self.records.as_deref().ok_or(DashError::DataUnavailable)?;
        let classifier = &self.classifier;
        let before = self.cache.stats().misses;
        let all: Vec<RiskAssessment> = self
            .cache
            .get_or_compute("risk:all", now, || Ok(classifier.classify_all(records)))?;

        let summary = summarize(&all);
        if self.cache.stats().misses > before {
            self.record_event(DashEvent::RiskReportGenerated {
                urgent: summary.urgent,
                monitor: summary.monitor,
                low_risk: summary.low_risk,
            });
        }
        Ok(RiskReport {
            summary,
            assessments: all.into_iter().take(limit).collect(),
        })
    }

    // ── Chat ───────────────────────────────────────────────────

    /// Never fails: without data the reply is the configured
    /// "unavailable" message.
    pub fn chat(&mut self, message: &str, model: Option<&mut dyn LanguageModel>) -> ChatReply {
        if let Err(e) = self.ensure_fresh() {
            log::debug!("service: chat without data: {e}");
        }
        let reply = self.responder.reply(message, self.records.as_deref(), model);
        self.record_event(DashEvent::ChatAnswered {
            intent: intent_name(&reply),
            source: format!("{:?}", reply.source).to_lowercase(),
        });
        reply
    }

    // ── Event log ──────────────────────────────────────────────

    fn record_event(&self, event: DashEvent) {
        let Some(store) = &self.store else { return };
        if let Err(e) = store.record_event(&event, self.clock.now()) {
            log::warn!("service: could not log {}: {e}", event.event_type());
        }
    }
}

fn parse_code(raw: &str) -> DashResult<Code> {
    raw.trim()
        .parse::<Code>()
        .map_err(|_| DashError::InvalidRoot { raw: raw.to_string() })
}

fn intent_name(reply: &ChatReply) -> String {
    serde_json::to_value(&reply.intent)
        .ok()
        .and_then(|v| v.get("intent").and_then(|i| i.as_str()).map(str::to_string))
        .unwrap_or_else(|| "unknown".into())
}
