use super::*;
use chrono::{TimeZone, Utc};
use dl_core::{EntityName, NaturalKey};
use std::collections::BTreeMap;

fn rule(yaml: &str) -> CompiledRule {
    let config: QualityRuleConfig = serde_yaml::from_str(yaml).unwrap();
    CompiledRule::compile(&config).unwrap()
}

fn record(key: &str, field: &str, value: Value) -> NormalizedRecord {
    NormalizedRecord {
        entity: EntityName::new("orders"),
        source_key: NaturalKey::new(key),
        observed_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        attributes: BTreeMap::from([(field.to_string(), value)]),
    }
}

#[test]
fn test_not_null_counts_only_nulls() {
    let rule = rule("{ name: r, entity: orders, field: email, check: not_null }");
    let batch = vec![
        record("O1", "email", Value::Text("a@x".into())),
        record("O2", "email", Value::Null),
    ];
    let outcome = rule.evaluate(&batch);
    assert_eq!(outcome.records_checked, 2);
    assert_eq!(outcome.records_failed, 1);
    assert_eq!(outcome.sample_failures, vec!["O2"]);
    assert_eq!(outcome.score(), 50.0);
}

#[test]
fn test_value_checks_skip_nulls() {
    let rule = rule("{ name: r, entity: orders, field: total, check: non_negative }");
    let batch = vec![
        record("O1", "total", Value::Float(-1.0)),
        record("O2", "total", Value::Null),
        record("O3", "total", Value::Int(0)),
    ];
    let outcome = rule.evaluate(&batch);
    assert_eq!(outcome.records_failed, 1);
}

#[test]
fn test_unique_counts_every_duplicate() {
    let rule = rule("{ name: r, entity: orders, field: email, check: unique }");
    let batch = vec![
        record("O1", "email", Value::Text("a".into())),
        record("O2", "email", Value::Text("a".into())),
        record("O3", "email", Value::Text("b".into())),
        record("O4", "email", Value::Null),
        record("O5", "email", Value::Null),
    ];
    let outcome = rule.evaluate(&batch);
    assert_eq!(outcome.records_failed, 2);
    assert_eq!(outcome.sample_failures, vec!["O1", "O2"]);
}

#[test]
fn test_bounds_and_accepted_values() {
    let min = rule("{ name: r, entity: orders, field: qty, check: min_value, value: 2 }");
    let max = rule("{ name: r, entity: orders, field: qty, check: max_value, value: 2 }");
    let batch = vec![record("O1", "qty", Value::Int(1)), record("O2", "qty", Value::Int(3))];
    assert_eq!(min.evaluate(&batch).records_failed, 1);
    assert_eq!(max.evaluate(&batch).records_failed, 1);

    let accepted = rule(
        "{ name: r, entity: orders, field: status, check: accepted_values, values: [shipped, pending] }",
    );
    let batch = vec![
        record("O1", "status", Value::Text("shipped".into())),
        record("O2", "status", Value::Text("lost".into())),
    ];
    assert_eq!(accepted.evaluate(&batch).sample_failures, vec!["O2"]);
}

#[test]
fn test_regex_matches_whole_value() {
    let rule = rule(r#"{ name: r, entity: orders, field: email, check: regex, pattern: '[a-z]+@[a-z]+\.com' }"#);
    let batch = vec![
        record("O1", "email", Value::Text("ann@shop.com".into())),
        record("O2", "email", Value::Text("ann@shop.com.evil".into())),
    ];
    assert_eq!(rule.evaluate(&batch).sample_failures, vec!["O2"]);
}

#[test]
fn test_invalid_pattern_rejected() {
    let config: QualityRuleConfig = serde_yaml::from_str(
        "{ name: broken, entity: orders, field: email, check: regex, pattern: '(' }",
    )
    .unwrap();
    let err = CompiledRule::compile(&config).unwrap_err();
    assert!(err.to_string().contains("broken"));
}

#[test]
fn test_samples_are_capped() {
    let rule = rule("{ name: r, entity: orders, field: qty, check: positive }");
    let batch: Vec<NormalizedRecord> = (0..20)
        .map(|i| record(&format!("O{i}"), "qty", Value::Int(0)))
        .collect();
    let outcome = rule.evaluate(&batch);
    assert_eq!(outcome.records_failed, 20);
    assert_eq!(outcome.sample_failures.len(), SAMPLE_LIMIT);
    assert_eq!(outcome.score(), 0.0);
}

#[test]
fn test_empty_batch_scores_100() {
    let rule = rule("{ name: r, entity: orders, field: qty, check: positive }");
    assert_eq!(rule.evaluate(&[]).score(), 100.0);
}
