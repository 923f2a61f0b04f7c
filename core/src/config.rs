use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ── Ingestion ──────────────────────────────────────────────────────

/// Header aliases per canonical field, keyed by canonical field name
/// (`code`, `name`, `status`, `active_clients`, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub field_aliases: HashMap<String, Vec<String>>,
    /// Values treated as "no sponsor" besides empty cells.
    #[serde(default = "default_root_sentinels")]
    pub root_sentinels: Vec<String>,
}

fn default_root_sentinels() -> Vec<String> {
    vec!["0".into(), "-".into()]
}

// ── Insight rules ──────────────────────────────────────────────────

/// Fixed business rules for the risk classifier.
/// Weights add up per triggered factor; the sum is capped at `score_cap`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskRules {
    /// Records with fewer active clients than this trigger the factor.
    pub low_active_clients_threshold: u64,
    pub low_active_clients_weight:    f64,
    pub no_telecom_weight:            f64,
    pub no_recruits_weight:           f64,
    pub entry_tier_weight:            f64,
    pub score_cap:                    f64,
    /// Scores strictly above this are "urgent".
    pub urgent_above:                 f64,
    /// Scores at or above this (and not urgent) are "monitor".
    pub monitor_from:                 f64,
}

#[derive(Debug, Clone, Deserialize)]
struct RiskRulesFile {
    risk: RiskRules,
}

// ── Service ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    /// Seconds a memoized aggregate stays fresh.
    pub ttl_secs: u64,
    /// After a failed refresh, seconds to keep serving the previous
    /// snapshot before the source is tried again.
    #[serde(default = "default_retry_after_secs")]
    pub retry_after_secs: u64,
}

fn default_retry_after_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HierarchyConfig {
    /// Depth used when a request gives none. `None` means unbounded.
    pub default_max_depth: Option<usize>,
    /// Requests asking for more than this are rejected.
    pub max_depth_limit:   usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankingConfig {
    pub default_limit: usize,
    pub max_limit:     usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatConfig {
    /// Reply used whenever no data has been loaded. Never replaced by
    /// invented figures.
    pub unavailable_message: String,
    pub fallback_message:    String,
    pub greeting_message:    String,
    pub top_performers:      usize,
    pub system_prompt:       String,
}

#[derive(Debug, Clone, Deserialize)]
struct ServiceFile {
    cache:     CacheConfig,
    hierarchy: HierarchyConfig,
    ranking:   RankingConfig,
    chat:      ChatConfig,
}

#[derive(Debug, Clone)]
pub struct DashConfig {
    pub ingest:    IngestConfig,
    pub risk:      RiskRules,
    pub cache:     CacheConfig,
    pub hierarchy: HierarchyConfig,
    pub ranking:   RankingConfig,
    pub chat:      ChatConfig,
}

impl DashConfig {
    /// Load from the data/ directory.
    /// In tests, use DashConfig::default_test().
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let ingest_path = format!("{data_dir}/ingest/field_map.json");
        let ingest_content = std::fs::read_to_string(&ingest_path)
            .map_err(|e| anyhow::anyhow!("Cannot read {ingest_path}: {e}"))?;
        let ingest: IngestConfig = serde_json::from_str(&ingest_content)?;

        let risk_path = format!("{data_dir}/insight/risk_rules.json");
        let risk_content = std::fs::read_to_string(&risk_path)
            .map_err(|e| anyhow::anyhow!("Cannot read {risk_path}: {e}"))?;
        let risk_file: RiskRulesFile = serde_json::from_str(&risk_content)?;
        risk_file.risk.validate()?;

        let service_path = format!("{data_dir}/service/service_config.json");
        let service_content = std::fs::read_to_string(&service_path)
            .map_err(|e| anyhow::anyhow!("Cannot read {service_path}: {e}"))?;
        let service: ServiceFile = serde_json::from_str(&service_content)?;

        log::debug!(
            "config loaded from {data_dir}: {} field aliases, cache ttl {}s",
            ingest.field_aliases.len(),
            service.cache.ttl_secs,
        );

        Ok(Self {
            ingest,
            risk: risk_file.risk,
            cache: service.cache,
            hierarchy: service.hierarchy,
            ranking: service.ranking,
            chat: service.chat,
        })
    }

    /// Config with hardcoded defaults for use in unit tests.
    pub fn default_test() -> Self {
        Self {
            ingest: IngestConfig::default(),
            risk: RiskRules::default(),
            cache: CacheConfig { ttl_secs: 300, retry_after_secs: 30 },
            hierarchy: HierarchyConfig {
                default_max_depth: None,
                max_depth_limit: 64,
            },
            ranking: RankingConfig {
                default_limit: 10,
                max_limit: 100,
            },
            chat: ChatConfig::default(),
        }
    }
}

impl RiskRules {
    /// Reject rule sets whose label bands overlap or exceed the cap.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.monitor_from > self.urgent_above {
            anyhow::bail!(
                "risk rules: monitor_from ({}) must not exceed urgent_above ({})",
                self.monitor_from,
                self.urgent_above
            );
        }
        if !(0.0..=100.0).contains(&self.score_cap) {
            anyhow::bail!("risk rules: score_cap {} outside [0, 100]", self.score_cap);
        }
        Ok(())
    }
}

impl Default for RiskRules {
    fn default() -> Self {
        Self {
            low_active_clients_threshold: 3,
            low_active_clients_weight:    30.0,
            no_telecom_weight:            25.0,
            no_recruits_weight:           20.0,
            entry_tier_weight:            15.0,
            score_cap:                    95.0,
            urgent_above:                 70.0,
            monitor_from:                 40.0,
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        let table: [(&str, &[&str]); 10] = [
            ("code",            &["code", "codigo", "id", "codigo licenciado"]),
            ("name",            &["name", "nome", "licenciado", "nome licenciado"]),
            ("status",          &["status", "situacao"]),
            ("active_clients",  &["active_clients", "clientes ativos", "ativos"]),
            ("telecom_clients", &["telecom_clients", "clientes telecom", "telecom"]),
            ("graduation_tier", &["graduation_tier", "graduacao", "nivel", "tier"]),
            ("sponsor_code",    &["sponsor_code", "sponsor_id", "patrocinador", "codigo patrocinador", "id patrocinador"]),
            ("city",            &["city", "cidade"]),
            ("state_code",      &["state_code", "state", "uf", "estado"]),
            ("activation_date", &["activation_date", "data ativacao", "data de ativacao"]),
        ];
        Self {
            field_aliases: table
                .into_iter()
                .map(|(field, aliases)| {
                    (field.to_string(), aliases.iter().map(|a| a.to_string()).collect())
                })
                .collect(),
            root_sentinels: default_root_sentinels(),
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            unavailable_message: "Os dados da rede ainda não estão disponíveis. \
                                  Tente novamente em alguns minutos."
                .into(),
            fallback_message: "Posso responder sobre licenciados ativos, ranking, \
                               risco, distribuição por estado e a rede de um código."
                .into(),
            greeting_message: "Olá! Pergunte sobre os indicadores da rede.".into(),
            top_performers: 5,
            system_prompt: "Você é o assistente do painel de licenciados. Responda apenas \
                            com base nos dados fornecidos. Se um número não estiver nos \
                            dados, diga que a informação não está disponível."
                .into(),
        }
    }
}
