use super::*;
use crate::entity::ScdPolicy;
use crate::scd::{DimensionRow, MergeOp};
use chrono::TimeZone;

fn orders() -> EntityDescriptor {
    serde_yaml::from_str(
        r#"
name: orders
kind: fact
table: fact_orders
natural_key: order_id
dedup_key: [order_id, product_id]
references:
  - { dimension: customers, field: customer_id, column: customer_key }
  - { dimension: products, field: product_id, column: product_key }
measures: { quantity: quantity, unit_price: unit_price, discount: discount, tax: tax }
fields:
  - { name: order_id, type: string, required: true }
  - { name: customer_id, type: string }
  - { name: product_id, type: string }
  - { name: quantity, type: integer }
  - { name: unit_price, type: float }
  - { name: discount, type: float }
  - { name: tax, type: float }
"#,
    )
    .unwrap()
}

fn order(id: &str, customer: &str, product: &str) -> NormalizedRecord {
    let mut attributes = BTreeMap::new();
    attributes.insert("order_id".to_string(), Value::Text(id.into()));
    attributes.insert("customer_id".to_string(), Value::Text(customer.into()));
    attributes.insert("product_id".to_string(), Value::Text(product.into()));
    attributes.insert("quantity".to_string(), Value::Int(3));
    attributes.insert("unit_price".to_string(), Value::Float(19.99));
    attributes.insert("discount".to_string(), Value::Float(5.0));
    attributes.insert("tax".to_string(), Value::Null);
    NormalizedRecord {
        entity: EntityName::new("orders"),
        source_key: NaturalKey::new(id),
        observed_at: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
        attributes,
    }
}

fn keys() -> DimensionKeys {
    let mut keys = DimensionKeys::new();
    keys.set_persisted(
        EntityName::new("customers"),
        HashMap::from([(NaturalKey::new("C1"), 1)]),
    );
    keys.set_persisted(
        EntityName::new("products"),
        (1..=9)
            .map(|i| (NaturalKey::new(format!("P{i}")), 100 + i))
            .collect(),
    );
    keys
}

#[test]
fn test_one_unresolved_order_out_of_ten() {
    let mut batch: Vec<NormalizedRecord> = (1..=9)
        .map(|i| order(&format!("O{i}"), "C1", &format!("P{i}")))
        .collect();
    batch.push(order("O10", "C1", "P404"));

    let resolution = resolve_facts(&orders(), &batch, &keys());
    assert_eq!(resolution.resolved(), 9);
    assert_eq!(resolution.unresolved(), 1);
    assert_eq!(
        resolution.failures[0].error,
        FactError::UnresolvedReference {
            dimension: "products".into(),
            field: "product_id".into(),
            natural_key: "P404".into(),
        }
    );
    assert_eq!(resolution.rows[0].keys["customer_key"], 1);
    assert_eq!(resolution.rows[0].keys["product_key"], 101);
}

#[test]
fn test_total_amount() {
    let row = resolve_fact(&orders(), &order("O1", "C1", "P1"), &keys()).unwrap();
    assert_eq!(row.total, Some(54.97));

    let mut taxed = order("O1", "C1", "P1");
    taxed.attributes.insert("tax".into(), Value::Float(1.01));
    taxed.attributes.insert("discount".into(), Value::Null);
    assert_eq!(
        compute_total(orders().measures.as_ref().unwrap(), &taxed).unwrap(),
        60.98
    );
}

#[test]
fn test_missing_quantity_rejected() {
    let mut record = order("O1", "C1", "P1");
    record.attributes.insert("quantity".into(), Value::Null);
    let err = resolve_fact(&orders(), &record, &keys()).unwrap_err();
    assert_eq!(
        err,
        FactError::InvalidMeasure {
            field: "quantity".into()
        }
    );
}

#[test]
fn test_null_dedup_field_rejected() {
    let mut record = order("O1", "C1", "P1");
    record.attributes.insert("product_id".into(), Value::Null);
    let resolution = resolve_facts(&orders(), &[record], &keys());
    assert_eq!(resolution.resolved(), 0);
    assert_eq!(resolution.unresolved(), 0);
    assert!(matches!(
        resolution.failures[0].error,
        FactError::MissingDedupKey { .. }
    ));
}

#[test]
fn test_merged_keys_shadow_persisted() {
    let mut keys = keys();
    let plan = MergePlan {
        entity: EntityName::new("customers"),
        policy: ScdPolicy::Type2,
        as_of: Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap(),
        ops: vec![
            MergeOp::Supersede {
                expired_key: 1,
                effective_to: Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap(),
                replacement: DimensionRow {
                    surrogate_key: 7,
                    natural_key: NaturalKey::new("C1"),
                    attributes: BTreeMap::new(),
                    effective_from: Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap(),
                    effective_to: crate::scd::open_ended(),
                    is_current: true,
                },
            },
            MergeOp::Insert(DimensionRow {
                surrogate_key: 8,
                natural_key: NaturalKey::new("C2"),
                attributes: BTreeMap::new(),
                effective_from: Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap(),
                effective_to: crate::scd::open_ended(),
                is_current: true,
            }),
        ],
        unchanged: 0,
    };
    keys.record_merge(&plan);

    assert_eq!(keys.current_key("customers", "C1"), Some(7));
    assert_eq!(keys.current_key("customers", "C2"), Some(8));
    assert_eq!(keys.current_key("products", "P3"), Some(103));
    assert_eq!(keys.current_key("stores", "S1"), None);
    assert!(keys.has_dimension("customers"));
}
