use super::*;

const SHOP_CONFIG: &str = r#"
name: shop_migration
warehouse:
  path: ":memory:"
load_mode: incremental
entities:
  - name: customers
    kind: dimension
    table: dim_customer
    natural_key: customer_id
    watermark_field: updated_at
    scd: type2
    tracked: [address]
    fields:
      - { name: customer_id, type: string, required: true }
      - { name: address, type: string }
      - { name: email, type: string, transform: lowercase }
      - { name: updated_at, type: timestamp, required: true }
  - name: orders
    kind: fact
    table: fact_orders
    natural_key: order_id
    watermark_field: order_date
    dedup_key: [order_id, customer_id]
    references:
      - { dimension: customers, field: customer_id, column: customer_key }
    measures: { quantity: quantity, unit_price: unit_price }
    fields:
      - { name: order_id, type: string, required: true }
      - { name: customer_id, type: string, required: true }
      - { name: order_date, type: date, required: true }
      - { name: quantity, type: integer }
      - { name: unit_price, type: float }
quality:
  min_score: 99
  rules:
    - { name: email_present, entity: customers, field: email, check: not_null }
    - { name: qty_positive, entity: orders, field: quantity, check: positive, severity: warn }
    - { name: price_floor, entity: orders, field: unit_price, check: min_value, value: 0.5, weight: 2 }
"#;

#[test]
fn test_parse_minimal_config() {
    let config = Config::from_yaml(
        r#"
name: tiny
load_mode: full
entities: []
"#,
    )
    .unwrap();
    assert_eq!(config.name, "tiny");
    assert_eq!(config.load_mode, LoadMode::Full);
    assert_eq!(config.warehouse.path, "warehouse.duckdb");
    assert_eq!(config.meta.path, "target/meta.duckdb");
    assert_eq!(config.quality.min_score, 95.0);
    assert_eq!(config.quality.aggregation, Aggregation::Minimum);
    assert_eq!(config.checkpoint.default_timestamp, DateTime::<Utc>::UNIX_EPOCH);
}

#[test]
fn test_parse_full_config() {
    let config = Config::from_yaml(SHOP_CONFIG).unwrap();
    assert_eq!(config.entities.len(), 2);
    assert_eq!(config.dimensions().count(), 1);
    assert_eq!(config.facts().count(), 1);

    let rules = config.quality.rules_for("orders");
    assert_eq!(rules.len(), 2);
    assert_eq!(rules[0].severity, Severity::Warn);
    assert_eq!(rules[1].check, RuleCheck::MinValue { value: 0.5 });
    assert_eq!(rules[1].weight, 2.0);
    assert_eq!(config.quality.rules[0].check.name(), "not_null");
}

#[test]
fn test_unknown_top_level_key_rejected() {
    let err = Config::from_yaml("name: x\nentities: []\nload_mode: full\nbogus: 1").unwrap_err();
    assert!(matches!(err, CoreError::ConfigParseError { .. }));
}

#[test]
fn test_duplicate_entity_rejected() {
    let yaml = r#"
name: x
load_mode: full
entities:
  - { name: a, kind: dimension, table: t1, natural_key: id, fields: [{ name: id, type: string }] }
  - { name: a, kind: dimension, table: t2, natural_key: id, fields: [{ name: id, type: string }] }
"#;
    let err = Config::from_yaml(yaml).unwrap_err();
    assert!(err.to_string().contains("duplicate entity 'a'"));
}

#[test]
fn test_incremental_requires_watermark() {
    let yaml = r#"
name: x
entities:
  - { name: a, kind: dimension, table: t1, natural_key: id, fields: [{ name: id, type: string }] }
"#;
    let err = Config::from_yaml(yaml).unwrap_err();
    assert!(err.to_string().contains("watermark_field"));
}

#[test]
fn test_reference_to_fact_rejected() {
    let yaml = SHOP_CONFIG.replace("dimension: customers", "dimension: orders");
    let err = Config::from_yaml(&yaml).unwrap_err();
    assert!(err.to_string().contains("not a dimension"));
}

#[test]
fn test_rule_on_unknown_field_rejected() {
    let yaml = SHOP_CONFIG.replace("field: email, check", "field: phone, check");
    let err = Config::from_yaml(&yaml).unwrap_err();
    assert!(err.to_string().contains("unknown field 'customers.phone'"));
}

#[test]
fn test_rule_on_computed_total_accepted() {
    let yaml = SHOP_CONFIG.replace(
        "field: unit_price, check: min_value, value: 0.5, weight: 2",
        "field: total_amount, check: non_negative",
    );
    let config = Config::from_yaml(&yaml).unwrap();
    assert_eq!(config.quality.rules[2].field, "total_amount");

    // only facts with measures carry a total
    let yaml = SHOP_CONFIG.replace("field: email, check", "field: total_amount, check");
    assert!(Config::from_yaml(&yaml).is_err());
}

#[test]
fn test_min_score_out_of_range_rejected() {
    let yaml = SHOP_CONFIG.replace("min_score: 99", "min_score: 120");
    assert!(Config::from_yaml(&yaml).is_err());
}

#[test]
fn test_load_from_dir() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(CONFIG_FILE_NAME), SHOP_CONFIG).unwrap();
    let config = Config::load_from_dir(dir.path()).unwrap();
    assert_eq!(config.name, "shop_migration");
    assert!(config.require_entity("orders").is_ok());
    assert!(matches!(
        config.require_entity("returns"),
        Err(CoreError::EntityNotFound { .. })
    ));
}

#[test]
fn test_load_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = Config::load_from_dir(dir.path()).unwrap_err();
    assert!(matches!(err, CoreError::ConfigNotFound { .. }));
}

#[test]
fn test_checksum_changes_with_config() {
    let a = Config::from_yaml(SHOP_CONFIG).unwrap();
    let b = Config::from_yaml(&SHOP_CONFIG.replace("min_score: 99", "min_score: 98")).unwrap();
    assert_eq!(a.checksum().unwrap(), a.checksum().unwrap());
    assert_ne!(a.checksum().unwrap(), b.checksum().unwrap());
}

#[test]
fn test_load_mode_from_str() {
    assert_eq!("full".parse::<LoadMode>().unwrap(), LoadMode::Full);
    assert!("sometimes".parse::<LoadMode>().is_err());
}
