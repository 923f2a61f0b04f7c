//! Dashboard chat assistant.
//!
//! A message is first classified into a `ChatIntent`. Known intents are
//! answered directly from computed metrics. Anything else may go to an
//! external `LanguageModel`, with the computed figures as context; if that
//! call fails the assistant falls back to a fixed help text.
//!
//! RULE: without loaded data the assistant replies with the configured
//! "data unavailable" message. It never produces figures that were not
//! computed from records, and it does not call the model in that case.

use crate::{
    config::ChatConfig,
    error::DashResult,
    hierarchy::HierarchyBuilder,
    insight::{summarize, InsightClassifier},
    metrics::{self, BreakdownKey},
    record::{LicenseeRecord, LicenseeStatus, NumericField, SortDirection},
    text::words,
    types::Code,
};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "intent", rename_all = "snake_case")]
pub enum ChatIntent {
    Greeting,
    ActiveCount,
    InactiveCount,
    PendingCount,
    TotalCount,
    TopPerformers,
    RiskOverview,
    StateDistribution,
    AverageClients,
    NetworkOf { code: Code },
    Unknown,
}

// Keyword tables match folded words by prefix ("ativos" matches "ativo").
const COUNT_WORDS:    &[&str] = &["quantos", "quantas", "quanto", "how", "many", "numero", "total", "count"];
const ACTIVE_WORDS:   &[&str] = &["ativo", "ativa", "active"];
const INACTIVE_WORDS: &[&str] = &["inativ", "inactive", "cancelad"];
const PENDING_WORDS:  &[&str] = &["pendente", "pending"];
const PEOPLE_WORDS:   &[&str] = &["licenciad", "licensee", "consultor", "membro", "member"];
const RANKING_WORDS:  &[&str] = &["top", "ranking", "melhores", "melhor", "best", "maiores", "lider", "leader"];
const RISK_WORDS:     &[&str] = &["risco", "risk", "urgente", "urgent", "churn", "alerta"];
const STATE_WORDS:    &[&str] = &["estado", "uf", "state", "regiao", "region", "distribuicao", "geografi"];
const AVERAGE_WORDS:  &[&str] = &["media", "average", "mean"];
const NETWORK_WORDS:  &[&str] = &["rede", "network", "equipe", "team", "downline", "indicad", "patrocinad"];
const GREETING_WORDS: &[&str] = &["ola", "oi", "hello", "hi", "hey", "bom", "boa"];
// Exact-match tables.
const CODE_WORDS:      &[&str] = &["codigo", "cod", "code", "id", "licenciado", "licensee"];
const CONNECTOR_WORDS: &[&str] = &["do", "da", "de", "of", "o", "a"];

fn has_any(words: &[String], table: &[&str]) -> bool {
    words.iter().any(|w| table.iter().any(|k| w.starts_with(k)))
}

/// A number counts as a licensee code only right after a network or code
/// word, optionally through one connector ("rede do 1002", "codigo 1002").
/// Other numbers ("na rede em 2024") are not codes.
fn code_mention(words: &[String]) -> Option<Code> {
    words.iter().enumerate().skip(1).find_map(|(i, w)| {
        let code = w.parse::<Code>().ok()?;
        let mut prev = i - 1;
        if CONNECTOR_WORDS.contains(&words[prev].as_str()) && prev > 0 {
            prev -= 1;
        }
        let anchor = &words[prev];
        let anchored = NETWORK_WORDS.iter().any(|k| anchor.starts_with(k))
            || CODE_WORDS.contains(&anchor.as_str());
        anchored.then_some(code)
    })
}

/// Map a free-text message to an intent. Portuguese and English.
pub fn classify_intent(message: &str) -> ChatIntent {
    let words = words(message);
    if words.is_empty() {
        return ChatIntent::Unknown;
    }

    if has_any(&words, NETWORK_WORDS) {
        if let Some(code) = code_mention(&words) {
            return ChatIntent::NetworkOf { code };
        }
    }

    let asks_count = has_any(&words, COUNT_WORDS);
    // Status tables are checked most specific first.
    if has_any(&words, INACTIVE_WORDS) && (asks_count || has_any(&words, PEOPLE_WORDS)) {
        return ChatIntent::InactiveCount;
    }
    if has_any(&words, PENDING_WORDS) && (asks_count || has_any(&words, PEOPLE_WORDS)) {
        return ChatIntent::PendingCount;
    }
    if has_any(&words, ACTIVE_WORDS) && asks_count {
        return ChatIntent::ActiveCount;
    }
    if has_any(&words, RANKING_WORDS) {
        return ChatIntent::TopPerformers;
    }
    if has_any(&words, RISK_WORDS) {
        return ChatIntent::RiskOverview;
    }
    if has_any(&words, STATE_WORDS) {
        return ChatIntent::StateDistribution;
    }
    if has_any(&words, AVERAGE_WORDS) {
        return ChatIntent::AverageClients;
    }
    if asks_count && has_any(&words, PEOPLE_WORDS) {
        return ChatIntent::TotalCount;
    }
    if words.len() <= 3 && has_any(&words, GREETING_WORDS) {
        return ChatIntent::Greeting;
    }
    ChatIntent::Unknown
}

/// External text-generation collaborator.
pub trait LanguageModel {
    fn name(&self) -> &'static str;

    fn complete(&mut self, system_prompt: &str, user_prompt: &str) -> DashResult<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplySource {
    /// Built directly from computed metrics.
    Grounded,
    Model,
    /// No records loaded.
    Unavailable,
    /// Help text after an unknown intent with no usable model.
    Fallback,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChatReply {
    pub intent: ChatIntent,
    pub text:   String,
    pub source: ReplySource,
}

pub struct ChatResponder {
    config:     ChatConfig,
    classifier: InsightClassifier,
}

impl ChatResponder {
    pub fn new(config: ChatConfig, classifier: InsightClassifier) -> Self {
        Self { config, classifier }
    }

    /// Answer `message`. `records` is `None` when nothing has been loaded.
    pub fn reply(
        &self,
        message: &str,
        records: Option<&[LicenseeRecord]>,
        model: Option<&mut dyn LanguageModel>,
    ) -> ChatReply {
        let intent = classify_intent(message);
        log::debug!("chat: intent {intent:?}");

        let records = match records {
            Some(r) if !r.is_empty() => r,
            _ => {
                return ChatReply {
                    intent,
                    text: self.config.unavailable_message.clone(),
                    source: ReplySource::Unavailable,
                }
            }
        };

        match intent {
            ChatIntent::Greeting => ChatReply {
                intent,
                text: self.config.greeting_message.clone(),
                source: ReplySource::Grounded,
            },
            ChatIntent::Unknown => self.delegate(message, records, model),
            _ => {
                let text = self.grounded_answer(&intent, records);
                ChatReply { intent, text, source: ReplySource::Grounded }
            }
        }
    }

    fn delegate(
        &self,
        message: &str,
        records: &[LicenseeRecord],
        model: Option<&mut dyn LanguageModel>,
    ) -> ChatReply {
        let fallback = || ChatReply {
            intent: ChatIntent::Unknown,
            text: self.config.fallback_message.clone(),
            source: ReplySource::Fallback,
        };
        let Some(model) = model else {
            return fallback();
        };

        let (system, user) = self.build_prompt(message, records);
        match model.complete(&system, &user) {
            Ok(text) if !text.trim().is_empty() => ChatReply {
                intent: ChatIntent::Unknown,
                text: text.trim().to_string(),
                source: ReplySource::Model,
            },
            Ok(_) => {
                log::warn!("chat: {} returned an empty completion", model.name());
                fallback()
            }
            Err(e) => {
                log::warn!("chat: {} failed: {e}", model.name());
                fallback()
            }
        }
    }

    /// System prompt and user prompt carrying the computed data context.
    pub fn build_prompt(&self, message: &str, records: &[LicenseeRecord]) -> (String, String) {
        let overview = metrics::overview(records);
        let top = metrics::rank(
            records,
            NumericField::ActiveClients,
            SortDirection::Descending,
            self.config.top_performers,
        );
        let risk = summarize(&self.classifier.classify_all(records));
        let states = metrics::breakdown(records, BreakdownKey::State);

        let mut context = format!(
            "Licenciados: {} (ativos {}, inativos {}, pendentes {}). \
             Taxa de ativação: {:.1}%. Clientes ativos: {}. Clientes telecom: {}.\n",
            overview.total,
            overview.active,
            overview.inactive,
            overview.pending,
            overview.activation_rate * 100.0,
            overview.total_active_clients,
            overview.total_telecom_clients,
        );
        context.push_str("Top por clientes ativos:");
        for entry in &top {
            context.push_str(&format!(" {}. {} ({:.0});", entry.rank, entry.name, entry.value));
        }
        context.push_str(&format!(
            "\nRisco: urgente {}, monitorar {}, baixo {}.\nEstados:",
            risk.urgent, risk.monitor, risk.low_risk
        ));
        for row in states.iter().take(5) {
            context.push_str(&format!(" {} ({});", row.key, row.count));
        }

        (
            self.config.system_prompt.clone(),
            format!("Dados:\n{context}\n\nPergunta: {}", message.trim()),
        )
    }

    fn grounded_answer(&self, intent: &ChatIntent, records: &[LicenseeRecord]) -> String {
        let status_count = |s: LicenseeStatus| records.iter().filter(|r| r.status == s).count();
        let total = records.len();

        match intent {
            ChatIntent::ActiveCount => {
                let active = status_count(LicenseeStatus::Active);
                format!(
                    "Há {active} licenciados ativos de um total de {total} ({:.1}%).",
                    active as f64 / total as f64 * 100.0
                )
            }
            ChatIntent::InactiveCount => format!(
                "Há {} licenciados inativos de um total de {total}.",
                status_count(LicenseeStatus::Inactive)
            ),
            ChatIntent::PendingCount => format!(
                "Há {} licenciados pendentes de um total de {total}.",
                status_count(LicenseeStatus::Pending)
            ),
            ChatIntent::TotalCount => format!("A rede tem {total} licenciados cadastrados."),
            ChatIntent::TopPerformers => {
                let top = metrics::rank(
                    records,
                    NumericField::ActiveClients,
                    SortDirection::Descending,
                    self.config.top_performers,
                );
                let list: Vec<String> = top
                    .iter()
                    .map(|e| format!("{}. {} ({:.0} clientes ativos)", e.rank, e.name, e.value))
                    .collect();
                format!("Top {} licenciados: {}.", top.len(), list.join("; "))
            }
            ChatIntent::RiskOverview => {
                let assessed = self.classifier.classify_all(records);
                let summary = summarize(&assessed);
                let mut text = format!(
                    "Risco da rede: {} urgentes, {} para monitorar, {} de baixo risco.",
                    summary.urgent, summary.monitor, summary.low_risk
                );
                if let Some(worst) = assessed.first().filter(|a| a.score > 0.0) {
                    text.push_str(&format!(
                        " Maior pontuação: {} ({:.0}).",
                        worst.name, worst.score
                    ));
                }
                text
            }
            ChatIntent::StateDistribution => {
                let rows = metrics::breakdown(records, BreakdownKey::State);
                let list: Vec<String> = rows
                    .iter()
                    .take(5)
                    .map(|r| format!("{}: {}", r.key, r.count))
                    .collect();
                format!("Distribuição por estado: {}.", list.join(", "))
            }
            ChatIntent::AverageClients => {
                let m = metrics::aggregate(records, NumericField::ActiveClients, None);
                format!(
                    "Média de {:.1} clientes ativos por licenciado (desvio padrão {:.1}, mediana {:.0}).",
                    m.mean, m.std_dev, m.quartiles.q2
                )
            }
            ChatIntent::NetworkOf { code } => {
                let builder = HierarchyBuilder::new(records);
                match builder.record(*code) {
                    Some(record) => {
                        let downline = builder.downline(*code);
                        let direct = builder.build(*code, Some(1)).map_or(0, |t| t.children.len());
                        format!(
                            "{} ({code}) tem {direct} indicados diretos e {} licenciados na rede.",
                            record.name,
                            downline.len()
                        )
                    }
                    None => format!("O código {code} não foi encontrado nos dados."),
                }
            }
            ChatIntent::Greeting | ChatIntent::Unknown => self.config.fallback_message.clone(),
        }
    }
}
