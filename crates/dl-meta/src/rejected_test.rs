use super::*;
use chrono::TimeZone;

fn rejection(key: Option<&str>, phase: RejectPhase) -> Rejection {
    Rejection {
        entity: "orders".to_string(),
        phase,
        source_key: key.map(str::to_string),
        error_message: "[N001] Missing required field 'order_id'".to_string(),
        record_json: r#"{"order_id":null}"#.to_string(),
    }
}

#[test]
fn test_rejections_round_trip() {
    let db = MetaDb::open_memory().unwrap();
    let at = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
    let batch = vec![
        rejection(None, RejectPhase::Normalize),
        rejection(Some("O7"), RejectPhase::Resolve),
    ];
    assert_eq!(db.record_rejections("r1", &batch, at).unwrap(), 2);
    assert_eq!(db.record_rejections("r1", &[], at).unwrap(), 0);

    let stored = db.rejections("r1").unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].rejection, batch[0]);
    assert_eq!(stored[1].rejection.phase, RejectPhase::Resolve);
    assert_eq!(stored[1].rejection.source_key.as_deref(), Some("O7"));
    assert_eq!(stored[1].rejected_at, at);
    assert!(db.rejections("r2").unwrap().is_empty());
}
