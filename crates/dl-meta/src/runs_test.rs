use super::*;
use chrono::TimeZone;

fn t(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 8, minute, 0).unwrap()
}

fn new_run(run_id: &str, entity: &str, minute: u32) -> NewRun {
    NewRun {
        run_id: run_id.to_string(),
        pipeline_name: "shop".to_string(),
        entity: EntityName::new(entity),
        load_mode: LoadMode::Incremental,
        config_checksum: "abc123".to_string(),
        started_at: t(minute),
    }
}

#[test]
fn test_begin_run_inserts_running_row() {
    let db = MetaDb::open_memory().unwrap();
    let run = db.begin_run(&new_run("r1", "orders", 0)).unwrap();
    assert_eq!(run.status, RunStatus::Running);
    assert_eq!(run.started_at, t(0));
    assert_eq!(run.finished_at, None);
    assert_eq!(run.counts, RunCounts::default());
    assert_eq!(db.get_run("r1").unwrap(), Some(run));
}

#[test]
fn test_second_run_for_same_entity_rejected() {
    let db = MetaDb::open_memory().unwrap();
    db.begin_run(&new_run("r1", "orders", 0)).unwrap();
    let err = db.begin_run(&new_run("r2", "orders", 1)).unwrap_err();
    match err {
        MetaError::RunAlreadyInProgress { entity, run_id } => {
            assert_eq!(entity, "orders");
            assert_eq!(run_id, "r1");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(db.get_run("r2").unwrap().is_none());

    // Different entities run side by side
    db.begin_run(&new_run("r3", "customers", 1)).unwrap();
    assert_eq!(db.active_runs().unwrap().len(), 2);
}

#[test]
fn test_finish_records_counts_and_end_time() {
    let db = MetaDb::open_memory().unwrap();
    db.begin_run(&new_run("r1", "orders", 0)).unwrap();
    let counts = RunCounts {
        extracted: 10,
        normalized: 10,
        facts_written: 9,
        unresolved: 1,
        ..RunCounts::default()
    };
    db.update_run_counts("r1", &counts, Some(100.0)).unwrap();
    let run = db
        .finish_run("r1", RunStatus::Succeeded, &counts, Some(100.0), None, t(2))
        .unwrap();
    assert_eq!(run.status, RunStatus::Succeeded);
    assert_eq!(run.counts, counts);
    assert_eq!(run.quality_score, Some(100.0));
    assert_eq!(run.duration(), Some(chrono::Duration::minutes(2)));

    // The entity is free again
    db.begin_run(&new_run("r2", "orders", 3)).unwrap();
}

#[test]
fn test_terminal_state_is_immutable() {
    let db = MetaDb::open_memory().unwrap();
    db.begin_run(&new_run("r1", "orders", 0)).unwrap();
    let counts = RunCounts::default();
    db.finish_run("r1", RunStatus::Failed, &counts, None, Some("boom"), t(1))
        .unwrap();

    let err = db
        .finish_run("r1", RunStatus::Succeeded, &counts, None, None, t(2))
        .unwrap_err();
    assert!(matches!(err, MetaError::TerminalRunState { ref status, .. } if status == "failed"));
    let err = db.update_run_counts("r1", &counts, None).unwrap_err();
    assert!(err.to_string().contains("[M008]"));

    let run = db.get_run("r1").unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.error_message.as_deref(), Some("boom"));
    assert_eq!(run.finished_at, Some(t(1)));
}

#[test]
fn test_unknown_run_and_non_terminal_finish() {
    let db = MetaDb::open_memory().unwrap();
    let counts = RunCounts::default();
    let err = db
        .finish_run("nope", RunStatus::Failed, &counts, None, None, t(0))
        .unwrap_err();
    assert!(matches!(err, MetaError::RunNotFound(_)));

    db.begin_run(&new_run("r1", "orders", 0)).unwrap();
    assert!(db
        .finish_run("r1", RunStatus::Running, &counts, None, None, t(1))
        .is_err());
}

#[test]
fn test_recent_runs_newest_first() {
    let db = MetaDb::open_memory().unwrap();
    for (i, entity) in ["a", "b", "c"].iter().enumerate() {
        db.begin_run(&new_run(&format!("r{i}"), entity, i as u32))
            .unwrap();
    }
    let ids: Vec<String> = db
        .recent_runs(2)
        .unwrap()
        .into_iter()
        .map(|r| r.run_id)
        .collect();
    assert_eq!(ids, vec!["r2", "r1"]);
}
