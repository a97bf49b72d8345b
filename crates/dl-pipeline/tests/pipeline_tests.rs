//! End-to-end runs against in-memory warehouse and meta databases.

use dl_core::{Config, LoadMode, RawRecord, Watermark};
use dl_db::{DuckDbWarehouse, MemoryExtractor, Warehouse};
use dl_meta::{MetaDb, MetaError, RejectPhase, RunStatus};
use dl_pipeline::{
    CancellationFlag, CollectingSink, EventSink, Phase, Pipeline, PipelineError, PipelineEvent,
    RunTracker,
};
use std::sync::Arc;

fn shop_config(min_score: f64) -> Config {
    Config::from_yaml(&format!(
        r#"
name: shop
warehouse:
  path: ":memory:"
entities:
  - name: customers
    kind: dimension
    table: dim_customer
    natural_key: customer_id
    watermark_field: updated_at
    scd: type2
    tracked: [address]
    fields:
      - {{ name: customer_id, type: string, required: true }}
      - {{ name: address, type: string }}
      - {{ name: email, type: string, transform: lowercase }}
      - {{ name: updated_at, type: timestamp, required: true }}
  - name: orders
    kind: fact
    table: fact_orders
    natural_key: order_id
    watermark_field: ordered_at
    dedup_key: [order_id]
    references:
      - {{ dimension: customers, field: customer_id, column: customer_key }}
    measures: {{ quantity: quantity, unit_price: unit_price, total: total_amount }}
    fields:
      - {{ name: order_id, type: string, required: true }}
      - {{ name: customer_id, type: string, required: true }}
      - {{ name: quantity, type: integer }}
      - {{ name: unit_price, type: float }}
      - {{ name: ordered_at, type: timestamp, required: true }}
quality:
  min_score: {min_score}
  rules:
    - {{ name: email_present, entity: customers, field: email, check: not_null }}
    - {{ name: qty_positive, entity: orders, field: quantity, check: positive }}
    - {{ name: total_non_negative, entity: orders, field: total_amount, check: non_negative }}
"#
    ))
    .unwrap()
}

struct Harness {
    pipeline: Pipeline,
    warehouse: Arc<DuckDbWarehouse>,
    extractor: Arc<MemoryExtractor>,
    meta: Arc<MetaDb>,
    events: Arc<CollectingSink>,
}

impl Harness {
    fn new(min_score: f64) -> Self {
        Self::with_config(shop_config(min_score))
    }

    fn with_config(config: Config) -> Self {
        let warehouse = Arc::new(DuckDbWarehouse::in_memory().unwrap());
        let extractor = Arc::new(MemoryExtractor::new());
        let meta = Arc::new(MetaDb::open_memory().unwrap());
        let events = Arc::new(CollectingSink::new());
        let pipeline = Pipeline::new(
            config,
            warehouse.clone(),
            extractor.clone(),
            meta.clone(),
        )
        .unwrap()
        .with_events(events.clone());
        Self {
            pipeline,
            warehouse,
            extractor,
            meta,
            events,
        }
    }

    fn entity(&self, name: &str) -> dl_core::EntityDescriptor {
        self.pipeline.config().require_entity(name).unwrap().clone()
    }
}

fn customer(id: &str, address: &str, email: Option<&str>, updated_at: &str) -> RawRecord {
    RawRecord::new()
        .with("customer_id", id)
        .with("address", address)
        .with("email", email.map_or(serde_json::Value::Null, serde_json::Value::from))
        .with("updated_at", updated_at)
}

fn order(id: &str, customer_id: &str, ordered_at: &str) -> RawRecord {
    RawRecord::new()
        .with("order_id", id)
        .with("customer_id", customer_id)
        .with("quantity", "2")
        .with("unit_price", "10.50")
        .with("ordered_at", ordered_at)
}

fn ts(s: &str) -> chrono::DateTime<chrono::Utc> {
    dl_core::parse_timestamp(s).unwrap()
}

#[tokio::test]
async fn test_type2_change_keeps_history() {
    let h = Harness::new(95.0);
    h.extractor
        .set(
            "customers",
            vec![customer("C1", "A", Some("c1@shop.com"), "2024-01-01 00:00:00")],
        )
        .unwrap();
    let first = h
        .pipeline
        .run_entity("customers", LoadMode::Incremental)
        .await
        .unwrap();
    assert!(first.succeeded(), "{:?}", first.error);
    assert_eq!(first.run.counts.inserted, 1);

    h.extractor
        .set(
            "customers",
            vec![
                customer("C1", "A", Some("c1@shop.com"), "2024-01-01 00:00:00"),
                customer("C1", "B", Some("c1@shop.com"), "2024-02-01 00:00:00"),
            ],
        )
        .unwrap();
    let second = h
        .pipeline
        .run_entity("customers", LoadMode::Incremental)
        .await
        .unwrap();
    assert!(second.succeeded(), "{:?}", second.error);
    assert_eq!(second.run.counts.extracted, 1);
    assert_eq!(second.run.counts.expired, 1);
    assert_eq!(second.run.counts.inserted, 0);

    let dim = h.entity("customers");
    let history = h.warehouse.history(&dim, "C1").await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(!history[0].is_current);
    assert!(history[1].is_current);
    assert_eq!(history[0].effective_to, history[1].effective_from);
    assert_ne!(history[0].surrogate_key, history[1].surrogate_key);

    let current = h.warehouse.current_row(&dim, "C1").await.unwrap().unwrap();
    assert_eq!(current.get("address").render().as_deref(), Some("B"));
}

#[tokio::test]
async fn test_full_rerun_is_idempotent() {
    let h = Harness::new(95.0);
    h.extractor
        .set(
            "customers",
            vec![
                customer("C1", "A", Some("c1@shop.com"), "2024-01-01 00:00:00"),
                customer("C2", "B", Some("c2@shop.com"), "2024-01-02 00:00:00"),
            ],
        )
        .unwrap();
    h.extractor
        .set(
            "orders",
            vec![
                order("O1", "C1", "2024-01-05 10:00:00"),
                order("O2", "C2", "2024-01-05 11:00:00"),
            ],
        )
        .unwrap();

    let first = h.pipeline.run_many(&[], LoadMode::Full).await.unwrap();
    assert!(first.iter().all(|r| r.as_ref().unwrap().succeeded()));

    let second = h.pipeline.run_many(&[], LoadMode::Full).await.unwrap();
    let second: Vec<_> = second.into_iter().map(Result::unwrap).collect();
    assert!(second.iter().all(|r| r.succeeded()));

    let customers = &second[0].run.counts;
    assert_eq!(customers.unchanged, 2);
    assert_eq!(customers.inserted + customers.updated + customers.expired, 0);

    let orders = &second[1].run.counts;
    assert_eq!(orders.facts_written, 0);
    assert_eq!(orders.duplicates, 2);
    assert_eq!(h.warehouse.fact_count(&h.entity("orders")).await.unwrap(), 2);

    let dim = h.entity("customers");
    for key in ["C1", "C2"] {
        assert_eq!(h.warehouse.history(&dim, key).await.unwrap().len(), 1);
    }
}

#[tokio::test]
async fn test_untracked_change_writes_nothing() {
    let h = Harness::new(95.0);
    h.extractor
        .set(
            "customers",
            vec![customer("C1", "A", Some("old@shop.com"), "2024-01-01 00:00:00")],
        )
        .unwrap();
    h.pipeline
        .run_entity("customers", LoadMode::Incremental)
        .await
        .unwrap();

    h.extractor
        .set(
            "customers",
            vec![customer("C1", "A", Some("NEW@shop.com"), "2024-01-03 00:00:00")],
        )
        .unwrap();
    let report = h
        .pipeline
        .run_entity("customers", LoadMode::Incremental)
        .await
        .unwrap();
    assert!(report.succeeded(), "{:?}", report.error);
    let counts = &report.run.counts;
    assert_eq!(counts.unchanged, 1);
    assert_eq!(counts.inserted + counts.updated + counts.expired, 0);

    let dim = h.entity("customers");
    let history = h.warehouse.history(&dim, "C1").await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(
        history[0].get("email").render().as_deref(),
        Some("old@shop.com")
    );
}

#[tokio::test]
async fn test_transformed_key_at_cursor_timestamp_is_extracted() {
    let h = Harness::with_config(
        Config::from_yaml(
            r#"
name: shop
warehouse:
  path: ":memory:"
entities:
  - name: products
    kind: dimension
    table: dim_product
    natural_key: sku
    watermark_field: updated_at
    scd: type1
    fields:
      - { name: sku, type: string, required: true, transform: lowercase }
      - { name: title, type: string }
      - { name: updated_at, type: timestamp, required: true }
"#,
        )
        .unwrap(),
    );
    let product = |sku: &str| {
        RawRecord::new()
            .with("sku", sku)
            .with("title", "Widget")
            .with("updated_at", "2024-01-01 00:00:00")
    };

    h.extractor.set("products", vec![product("SKU-2")]).unwrap();
    h.pipeline
        .run_entity("products", LoadMode::Incremental)
        .await
        .unwrap();
    let checkpoint = h.pipeline.checkpoints().get("products").unwrap().unwrap();
    assert_eq!(checkpoint.watermark.identifier, "sku-2");

    h.extractor
        .set("products", vec![product("SKU-2"), product("SKU-3")])
        .unwrap();
    let report = h
        .pipeline
        .run_entity("products", LoadMode::Incremental)
        .await
        .unwrap();
    assert!(report.succeeded(), "{:?}", report.error);
    assert_eq!(report.run.counts.extracted, 1);
    assert_eq!(report.run.counts.inserted, 1);

    let dim = h.entity("products");
    let keys = h.warehouse.current_keys(&dim).await.unwrap();
    assert_eq!(keys.len(), 2);
    assert!(keys.contains_key("sku-3"));
}

#[tokio::test]
async fn test_incremental_checkpoint_advances_once() {
    let h = Harness::new(95.0);
    h.extractor
        .set(
            "customers",
            vec![
                customer("C2", "B", Some("c2@shop.com"), "2024-01-02 00:00:00"),
                customer("C1", "A", Some("c1@shop.com"), "2024-01-01 00:00:00"),
            ],
        )
        .unwrap();
    let first = h
        .pipeline
        .run_entity("customers", LoadMode::Incremental)
        .await
        .unwrap();
    let checkpoint = h.pipeline.checkpoints().get("customers").unwrap().unwrap();
    assert_eq!(
        checkpoint.watermark,
        Watermark::new(ts("2024-01-02 00:00:00"), "C2")
    );
    assert_eq!(checkpoint.records_loaded, 2);
    assert_eq!(checkpoint.run_id.as_deref(), Some(first.run.run_id.as_str()));

    // Same source again: nothing past the cursor
    let second = h
        .pipeline
        .run_entity("customers", LoadMode::Incremental)
        .await
        .unwrap();
    assert!(second.succeeded());
    assert_eq!(second.run.counts.extracted, 0);
    let unchanged = h.pipeline.checkpoints().get("customers").unwrap().unwrap();
    assert_eq!(unchanged, checkpoint);
}

#[tokio::test]
async fn test_full_load_resets_checkpoint() {
    let h = Harness::new(95.0);
    h.extractor
        .set(
            "customers",
            vec![customer("C3", "Z", Some("c3@shop.com"), "2024-03-01 00:00:00")],
        )
        .unwrap();
    h.pipeline
        .run_entity("customers", LoadMode::Incremental)
        .await
        .unwrap();

    h.extractor
        .set(
            "customers",
            vec![customer("C1", "A", Some("c1@shop.com"), "2024-01-01 00:00:00")],
        )
        .unwrap();
    let report = h
        .pipeline
        .run_entity("customers", LoadMode::Full)
        .await
        .unwrap();
    assert!(report.succeeded(), "{:?}", report.error);

    let checkpoint = h.pipeline.checkpoints().get("customers").unwrap().unwrap();
    assert_eq!(checkpoint.load_mode, LoadMode::Full);
    assert_eq!(
        checkpoint.watermark,
        Watermark::new(ts("2024-01-01 00:00:00"), "C1")
    );
    assert_eq!(checkpoint.records_loaded, 1);
}

fn hundred_customers(missing_email: usize) -> Vec<RawRecord> {
    (0..100)
        .map(|i| {
            let id = format!("C{i:03}");
            let email = (i >= missing_email).then(|| format!("{}@shop.com", id.to_lowercase()));
            customer(&id, "Main St", email.as_deref(), "2024-01-01 00:00:00")
        })
        .collect()
}

#[tokio::test]
async fn test_quality_gate_blocks_below_threshold() {
    let h = Harness::new(99.0);
    h.extractor
        .set("customers", hundred_customers(2))
        .unwrap();
    let report = h
        .pipeline
        .run_entity("customers", LoadMode::Incremental)
        .await
        .unwrap();

    assert_eq!(report.run.status, RunStatus::Failed);
    assert!(matches!(
        report.error,
        Some(PipelineError::QualityGateFailure { ref failed_rules, .. })
            if failed_rules == &vec!["email_present".to_string()]
    ));
    assert!(report.run.error_message.unwrap().contains("[P001]"));
    assert_eq!(report.run.quality_score, Some(98.0));

    let dim = h.entity("customers");
    assert!(h.warehouse.current_keys(&dim).await.unwrap().is_empty());
    assert!(h.pipeline.checkpoints().get("customers").unwrap().is_none());

    // Results are persisted even for a failed gate
    let stored = h.meta.quality_results(&report.run.run_id).unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].records_failed, 2);
    assert!(!stored[0].passed);
}

#[tokio::test]
async fn test_quality_gate_passes_at_lower_threshold() {
    let h = Harness::new(95.0);
    h.extractor
        .set("customers", hundred_customers(2))
        .unwrap();
    let report = h
        .pipeline
        .run_entity("customers", LoadMode::Incremental)
        .await
        .unwrap();

    assert!(report.succeeded(), "{:?}", report.error);
    assert_eq!(report.quality.as_ref().unwrap().score, 98.0);
    let dim = h.entity("customers");
    assert_eq!(h.warehouse.current_keys(&dim).await.unwrap().len(), 100);
}

/// One customer and 100 orders, the first `negative` of them with a
/// negative total
fn load_orders_with_negative_totals(h: &Harness, negative: usize) {
    h.extractor
        .set(
            "customers",
            vec![customer("C1", "A", Some("c1@shop.com"), "2024-01-01 00:00:00")],
        )
        .unwrap();
    let orders = (0..100)
        .map(|i| {
            let record = order(&format!("O{i:03}"), "C1", "2024-01-05 10:00:00");
            if i < negative {
                record.with("unit_price", "-4.00")
            } else {
                record
            }
        })
        .collect();
    h.extractor.set("orders", orders).unwrap();
}

#[tokio::test]
async fn test_negative_totals_block_orders_at_99() {
    let h = Harness::new(99.0);
    load_orders_with_negative_totals(&h, 2);
    let reports = h
        .pipeline
        .run_many(&[], LoadMode::Incremental)
        .await
        .unwrap();
    let orders = reports.into_iter().nth(1).unwrap().unwrap();

    assert_eq!(orders.run.status, RunStatus::Failed);
    assert!(matches!(
        orders.error,
        Some(PipelineError::QualityGateFailure { ref failed_rules, .. })
            if failed_rules == &vec!["total_non_negative".to_string()]
    ));
    assert_eq!(orders.run.quality_score, Some(98.0));
    assert_eq!(h.warehouse.fact_count(&h.entity("orders")).await.unwrap(), 0);
    assert!(h.pipeline.checkpoints().get("orders").unwrap().is_none());

    let stored = h.meta.quality_results(&orders.run.run_id).unwrap();
    let total = stored.iter().find(|r| r.rule == "total_non_negative").unwrap();
    assert_eq!(total.records_failed, 2);
    assert_eq!(total.records_checked, 100);
}

#[tokio::test]
async fn test_negative_totals_pass_orders_at_95() {
    let h = Harness::new(95.0);
    load_orders_with_negative_totals(&h, 2);
    let reports = h
        .pipeline
        .run_many(&[], LoadMode::Incremental)
        .await
        .unwrap();
    let orders = reports.into_iter().nth(1).unwrap().unwrap();

    assert!(orders.succeeded(), "{:?}", orders.error);
    assert_eq!(orders.quality.as_ref().unwrap().score, 98.0);
    assert_eq!(orders.run.counts.facts_written, 100);
    assert_eq!(h.warehouse.fact_count(&h.entity("orders")).await.unwrap(), 100);
}

#[tokio::test]
async fn test_unresolved_fact_is_logged_and_rest_load() {
    let h = Harness::new(95.0);
    let customers: Vec<RawRecord> = (1..=9)
        .map(|i| customer(&format!("C{i}"), "A", Some("x@shop.com"), "2024-01-01 00:00:00"))
        .collect();
    let mut orders: Vec<RawRecord> = (1..=9)
        .map(|i| order(&format!("O{i}"), &format!("C{i}"), "2024-01-05 10:00:00"))
        .collect();
    orders.push(order("O10", "C99", "2024-01-06 10:00:00"));
    h.extractor.set("customers", customers).unwrap();
    h.extractor.set("orders", orders).unwrap();

    let reports = h
        .pipeline
        .run_many(&[], LoadMode::Incremental)
        .await
        .unwrap();
    let orders = reports.into_iter().nth(1).unwrap().unwrap();
    assert!(orders.succeeded(), "{:?}", orders.error);
    assert_eq!(orders.run.counts.facts_written, 9);
    assert_eq!(orders.run.counts.unresolved, 1);
    assert_eq!(h.warehouse.fact_count(&h.entity("orders")).await.unwrap(), 9);

    let rejections = h.meta.rejections(&orders.run.run_id).unwrap();
    assert_eq!(rejections.len(), 1);
    assert_eq!(rejections[0].rejection.phase, RejectPhase::Resolve);
    assert_eq!(rejections[0].rejection.source_key.as_deref(), Some("O10"));
    assert!(rejections[0].rejection.error_message.contains("[R001]"));

    // The cursor moves past the unresolved record
    let checkpoint = h.pipeline.checkpoints().get("orders").unwrap().unwrap();
    assert_eq!(checkpoint.watermark.identifier, "O10");
}

#[tokio::test]
async fn test_normalization_rejects_are_logged() {
    let h = Harness::new(95.0);
    h.extractor
        .set(
            "customers",
            vec![
                customer("C1", "A", Some("c1@shop.com"), "2024-01-01 00:00:00"),
                customer("C2", "B", Some("c2@shop.com"), "not a date"),
            ],
        )
        .unwrap();
    let report = h
        .pipeline
        .run_entity("customers", LoadMode::Incremental)
        .await
        .unwrap();
    assert!(report.succeeded());
    assert_eq!(report.run.counts.extracted, 2);
    assert_eq!(report.run.counts.normalized, 1);
    assert_eq!(report.run.counts.rejected, 1);

    let rejections = h.meta.rejections(&report.run.run_id).unwrap();
    assert_eq!(rejections.len(), 1);
    assert_eq!(rejections[0].rejection.phase, RejectPhase::Normalize);
    assert_eq!(rejections[0].rejection.source_key.as_deref(), Some("C2"));
    assert!(rejections[0].rejection.record_json.contains("not a date"));

    assert!(h.events.events().iter().any(|e| matches!(
        e,
        PipelineEvent::RecordRejected { source_key: Some(key), .. } if key == "C2"
    )));
}

#[tokio::test]
async fn test_second_run_for_entity_refused() {
    let h = Harness::new(95.0);
    h.extractor.set("customers", Vec::new()).unwrap();
    let entity = h.entity("customers");
    let held = h
        .pipeline
        .tracker()
        .start(&entity.name, LoadMode::Incremental)
        .unwrap();

    let err = h
        .pipeline
        .run_entity("customers", LoadMode::Incremental)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Meta(MetaError::RunAlreadyInProgress { ref run_id, .. }) if *run_id == held.run_id
    ));

    h.pipeline.tracker().abort_run(&held.run_id, "test").unwrap();
    let report = h
        .pipeline
        .run_entity("customers", LoadMode::Incremental)
        .await
        .unwrap();
    assert!(report.succeeded());
}

/// Aborts every run as soon as it starts, like `dl runs abort` from another
/// process would
struct AbortOnStart(RunTracker);

impl EventSink for AbortOnStart {
    fn emit(&self, event: &PipelineEvent) {
        if let PipelineEvent::RunStarted { run_id, .. } = event {
            self.0.abort_run(run_id, "operator").unwrap();
        }
    }
}

#[tokio::test]
async fn test_run_closed_elsewhere_surfaces_error() {
    let h = Harness::new(95.0);
    h.extractor
        .set(
            "customers",
            vec![customer("C1", "A", Some("c1@shop.com"), "2024-01-01 00:00:00")],
        )
        .unwrap();
    let aborting = Pipeline::new(
        shop_config(95.0),
        h.warehouse.clone(),
        h.extractor.clone(),
        h.meta.clone(),
    )
    .unwrap()
    .with_events(Arc::new(AbortOnStart(RunTracker::new(
        h.meta.clone(),
        "shop",
        "abc",
    ))));

    let err = aborting
        .run_entity("customers", LoadMode::Incremental)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Meta(_)), "{err:?}");

    let runs = h.meta.recent_runs(10).unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Failed);
    assert!(h.meta.active_runs().unwrap().is_empty());

    // The entity is not blocked
    let report = h
        .pipeline
        .run_entity("customers", LoadMode::Incremental)
        .await
        .unwrap();
    assert!(report.succeeded(), "{:?}", report.error);
}

#[tokio::test]
async fn test_cancelled_run_is_failed_without_writes() {
    let cancel = CancellationFlag::new();
    let h = Harness::new(95.0);
    let pipeline = h.pipeline.with_cancellation(cancel.clone());
    h.extractor
        .set(
            "customers",
            vec![customer("C1", "A", Some("c1@shop.com"), "2024-01-01 00:00:00")],
        )
        .unwrap();

    cancel.cancel();
    let report = pipeline
        .run_entity("customers", LoadMode::Incremental)
        .await
        .unwrap();
    assert_eq!(report.run.status, RunStatus::Failed);
    assert!(matches!(report.error, Some(PipelineError::Cancelled)));
    assert!(report.run.error_message.unwrap().contains("run cancelled"));
    assert!(!h.warehouse.table_exists("dim_customer").await.unwrap());
    assert!(pipeline.checkpoints().get("customers").unwrap().is_none());
}

#[tokio::test]
async fn test_unknown_entity_opens_no_run() {
    let h = Harness::new(95.0);
    let err = h
        .pipeline
        .run_entity("suppliers", LoadMode::Full)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("[E004]"));
    assert!(h.meta.recent_runs(10).unwrap().is_empty());
}

#[tokio::test]
async fn test_events_bracket_the_run() {
    let h = Harness::new(95.0);
    h.extractor
        .set(
            "customers",
            vec![customer("C1", "A", Some("c1@shop.com"), "2024-01-01 00:00:00")],
        )
        .unwrap();
    h.pipeline
        .run_entity("customers", LoadMode::Incremental)
        .await
        .unwrap();

    let events = h.events.events();
    assert!(matches!(events.first(), Some(PipelineEvent::RunStarted { .. })));
    assert!(matches!(
        events.last(),
        Some(PipelineEvent::RunFinished {
            status: RunStatus::Succeeded,
            ..
        })
    ));
    let phases: Vec<Phase> = events
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::PhaseFinished { phase, .. } => Some(*phase),
            _ => None,
        })
        .collect();
    assert_eq!(
        phases,
        vec![
            Phase::Extract,
            Phase::Normalize,
            Phase::QualityGate,
            Phase::Merge,
            Phase::Checkpoint
        ]
    );
}
