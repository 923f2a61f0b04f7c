use netdash_core::{
    chat::{classify_intent, ChatIntent, ChatResponder, LanguageModel, ReplySource},
    config::{ChatConfig, RiskRules},
    error::{DashError, DashResult},
    insight::InsightClassifier,
    record::{LicenseeRecord, LicenseeStatus},
};

// ── Helpers ──────────────────────────────────────────────────────────────────

fn responder() -> ChatResponder {
    ChatResponder::new(ChatConfig::default(), InsightClassifier::new(RiskRules::default()))
}

fn network() -> Vec<LicenseeRecord> {
    let mut records = vec![
        LicenseeRecord::new(1, "Marina", None),
        LicenseeRecord::new(2, "Carlos", Some(1)),
        LicenseeRecord::new(3, "Patricia", Some(1)),
        LicenseeRecord::new(4, "Rodrigo", Some(2)),
    ];
    records[0].active_clients = 40;
    records[1].active_clients = 12;
    records[3].status = LicenseeStatus::Inactive;
    records
}

/// Records every prompt and answers with a fixed reply; `None` fails.
struct ScriptedModel {
    reply:   Option<String>,
    prompts: Vec<(String, String)>,
}

impl ScriptedModel {
    fn answering(text: &str) -> Self {
        Self { reply: Some(text.to_string()), prompts: Vec::new() }
    }

    fn failing() -> Self {
        Self { reply: None, prompts: Vec::new() }
    }
}

impl LanguageModel for ScriptedModel {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn complete(&mut self, system_prompt: &str, user_prompt: &str) -> DashResult<String> {
        self.prompts.push((system_prompt.to_string(), user_prompt.to_string()));
        self.reply.clone().ok_or_else(|| DashError::Upstream {
            source_name: "model".into(),
            message: "timeout".into(),
            retryable: true,
        })
    }
}

// ── Intent classification ────────────────────────────────────────────────────

#[test]
fn intents_are_recognized_in_portuguese_and_english() {
    assert_eq!(classify_intent("Quantos licenciados estão ativos?"), ChatIntent::ActiveCount);
    assert_eq!(classify_intent("how many active licensees"), ChatIntent::ActiveCount);
    assert_eq!(classify_intent("Quantos inativos temos?"), ChatIntent::InactiveCount);
    assert_eq!(classify_intent("licenciados pendentes"), ChatIntent::PendingCount);
    assert_eq!(classify_intent("Quantos licenciados existem?"), ChatIntent::TotalCount);
    assert_eq!(classify_intent("Quem são os melhores?"), ChatIntent::TopPerformers);
    assert_eq!(classify_intent("risco de churn"), ChatIntent::RiskOverview);
    assert_eq!(classify_intent("distribuição por estado"), ChatIntent::StateDistribution);
    assert_eq!(classify_intent("média de clientes"), ChatIntent::AverageClients);
    assert_eq!(classify_intent("rede do 1002"), ChatIntent::NetworkOf { code: 1002 });
    assert_eq!(classify_intent("Olá"), ChatIntent::Greeting);
}

#[test]
fn only_numbers_next_to_a_network_or_code_word_are_codes() {
    assert_eq!(classify_intent("equipe do codigo 1003"), ChatIntent::NetworkOf { code: 1003 });
    assert_eq!(classify_intent("network of 1004"), ChatIntent::NetworkOf { code: 1004 });
    assert_ne!(
        classify_intent("quantos entraram na rede em 2024"),
        ChatIntent::NetworkOf { code: 2024 }
    );
    assert!(!matches!(
        classify_intent("rede cresceu 15 por cento"),
        ChatIntent::NetworkOf { .. }
    ));
}

#[test]
fn unrelated_or_empty_messages_are_unknown() {
    assert_eq!(classify_intent(""), ChatIntent::Unknown);
    assert_eq!(classify_intent("   ?! "), ChatIntent::Unknown);
    assert_eq!(classify_intent("qual a previsão do tempo amanhã"), ChatIntent::Unknown);
}

// ── Replies ──────────────────────────────────────────────────────────────────

#[test]
fn no_data_means_the_unavailable_message_and_no_model_call() {
    let r = responder();
    let mut model = ScriptedModel::answering("há 999 licenciados");

    let reply = r.reply("Quantos licenciados estão ativos?", None, Some(&mut model));
    assert_eq!(reply.source, ReplySource::Unavailable);
    assert_eq!(reply.text, ChatConfig::default().unavailable_message);

    let reply = r.reply("qualquer coisa", Some(&[][..]), Some(&mut model));
    assert_eq!(reply.source, ReplySource::Unavailable);
    assert!(model.prompts.is_empty(), "the model must not be asked without data");
}

#[test]
fn known_intents_are_answered_from_the_records() {
    let records = network();
    let r = responder();

    let active = r.reply("quantos ativos?", Some(records.as_slice()), None);
    assert_eq!(active.source, ReplySource::Grounded);
    assert!(active.text.contains("3 licenciados ativos"), "{}", active.text);
    assert!(active.text.contains("total de 4"), "{}", active.text);

    let top = r.reply("top licenciados", Some(records.as_slice()), None);
    assert!(top.text.contains("1. Marina (40"), "{}", top.text);

    let net = r.reply("rede do 1", Some(records.as_slice()), None);
    assert!(net.text.contains("2 indicados diretos"), "{}", net.text);
    assert!(net.text.contains("3 licenciados na rede"), "{}", net.text);

    let missing = r.reply("rede do 77", Some(records.as_slice()), None);
    assert!(missing.text.contains("não foi encontrado"), "{}", missing.text);
}

#[test]
fn unknown_intents_go_to_the_model_with_data_context() {
    let records = network();
    let mut model = ScriptedModel::answering("  Resposta do modelo.  ");
    let reply = responder().reply("o que acha da campanha de inverno?", Some(records.as_slice()), Some(&mut model));

    assert_eq!(reply.source, ReplySource::Model);
    assert_eq!(reply.text, "Resposta do modelo.");
    let (system, user) = &model.prompts[0];
    assert!(system.contains("apenas"), "system prompt restricts answers to the data");
    assert!(user.contains("Licenciados: 4"), "{user}");
    assert!(user.contains("o que acha da campanha de inverno?"));
}

#[test]
fn model_failure_or_silence_falls_back_to_help_text() {
    let records = network();
    let r = responder();

    let mut broken = ScriptedModel::failing();
    let reply = r.reply("o que acha da campanha de inverno?", Some(records.as_slice()), Some(&mut broken));
    assert_eq!(reply.source, ReplySource::Fallback);
    assert_eq!(reply.text, ChatConfig::default().fallback_message);

    let mut silent = ScriptedModel::answering("   ");
    let reply = r.reply("o que acha da campanha de inverno?", Some(records.as_slice()), Some(&mut silent));
    assert_eq!(reply.source, ReplySource::Fallback);

    let reply = r.reply("o que acha da campanha de inverno?", Some(records.as_slice()), None);
    assert_eq!(reply.source, ReplySource::Fallback);
}
