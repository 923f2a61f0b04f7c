use netdash_core::{
    config::RiskRules,
    insight::{summarize, InsightClassifier, PerformanceCluster, RiskInputs, RiskLabel},
    metrics::Quartiles,
    record::{GraduationTier, LicenseeRecord},
};

// ── Helpers ──────────────────────────────────────────────────────────────────

fn classifier() -> InsightClassifier {
    InsightClassifier::new(RiskRules::default())
}

fn inputs(active: u64, telecom: u64, recruits: usize, tier: GraduationTier) -> RiskInputs {
    RiskInputs {
        active_clients: Some(active),
        telecom_clients: Some(telecom),
        direct_recruits: Some(recruits),
        graduation_tier: Some(tier),
    }
}

// ── Scoring ──────────────────────────────────────────────────────────────────

#[test]
fn every_factor_triggered_is_capped() {
    let (score, factors) = classifier().score(&inputs(0, 0, 0, GraduationTier::Consultant));
    // 30 + 25 + 20 + 15 = 90, under the cap of 95.
    assert_eq!(score, 90.0);
    assert_eq!(factors.len(), 4);

    let heavy = RiskRules { low_active_clients_weight: 60.0, ..RiskRules::default() };
    let (capped, _) = InsightClassifier::new(heavy).score(&inputs(0, 0, 0, GraduationTier::Consultant));
    assert_eq!(capped, 95.0);
}

#[test]
fn healthy_licensee_scores_zero() {
    let (score, factors) = classifier().score(&inputs(12, 3, 2, GraduationTier::Director));
    assert_eq!(score, 0.0);
    assert!(factors.is_empty());
    assert_eq!(classifier().label_for(score), RiskLabel::LowRisk);
}

#[test]
fn label_bands_follow_thresholds() {
    let c = classifier();
    assert_eq!(c.label_for(70.1), RiskLabel::Urgent);
    assert_eq!(c.label_for(70.0), RiskLabel::Monitor);
    assert_eq!(c.label_for(40.0), RiskLabel::Monitor);
    assert_eq!(c.label_for(39.9), RiskLabel::LowRisk);
}

#[test]
fn missing_inputs_count_as_zero() {
    let c = classifier();
    let (score, factors) = c.score(&RiskInputs::default());
    assert_eq!(score, 90.0, "every factor fires when nothing is known");
    assert!(factors.iter().any(|f| f.contains("consultant")));
    assert_eq!(c.label_for(score), RiskLabel::Urgent);
}

#[test]
fn threshold_is_strictly_below() {
    let c = classifier();
    let (at, _) = c.score(&inputs(3, 1, 1, GraduationTier::Manager));
    let (below, factors) = c.score(&inputs(2, 1, 1, GraduationTier::Manager));
    assert_eq!(at, 0.0);
    assert_eq!(below, 30.0);
    assert_eq!(factors, vec!["active clients below 3 (2)".to_string()]);
}

#[test]
fn classification_is_deterministic() {
    let c = classifier();
    let i = inputs(1, 0, 1, GraduationTier::Consultant);
    let first = c.score(&i);
    for _ in 0..10 {
        assert_eq!(c.score(&i), first);
    }
}

// ── Clusters and population ──────────────────────────────────────────────────

#[test]
fn clusters_follow_population_quartiles() {
    let q = Quartiles { q1: 2.0, q2: 5.0, q3: 10.0 };
    assert_eq!(InsightClassifier::cluster(12.0, &q), PerformanceCluster::TopPerformer);
    assert_eq!(InsightClassifier::cluster(10.0, &q), PerformanceCluster::TopPerformer);
    assert_eq!(InsightClassifier::cluster(5.0, &q), PerformanceCluster::Steady);
    assert_eq!(InsightClassifier::cluster(2.0, &q), PerformanceCluster::Developing);
    assert_eq!(InsightClassifier::cluster(1.0, &q), PerformanceCluster::Lagging);
}

#[test]
fn classify_all_sorts_by_score_and_counts_recruits() {
    let mut top = LicenseeRecord::new(1, "Top", None);
    top.active_clients = 20;
    top.telecom_clients = 5;
    top.graduation_tier = GraduationTier::Director;
    let mut mid = LicenseeRecord::new(2, "Mid", Some(1));
    mid.active_clients = 10;
    mid.telecom_clients = 0;
    mid.graduation_tier = GraduationTier::Manager;
    let fresh = LicenseeRecord::new(3, "Fresh", Some(2));

    let assessed = classifier().classify_all(&[top, mid, fresh]);
    let ids: Vec<u64> = assessed.iter().map(|a| a.id).collect();
    assert_eq!(ids, vec![3, 2, 1]);

    // 1 recruits 2, 2 recruits 3: neither gets the no-recruits factor.
    assert_eq!(assessed[2].score, 0.0);
    assert_eq!(assessed[1].score, 25.0);
    assert_eq!(assessed[0].label, RiskLabel::Urgent);

    let summary = summarize(&assessed);
    assert_eq!((summary.urgent, summary.monitor, summary.low_risk), (1, 0, 2));
}

#[test]
fn equal_scores_keep_source_order() {
    let records: Vec<_> = (1..=4).map(|c| LicenseeRecord::new(c, format!("L{c}"), None)).collect();
    let assessed = classifier().classify_all(&records);
    assert_eq!(assessed.iter().map(|a| a.id).collect::<Vec<_>>(), vec![1, 2, 3, 4]);
}
