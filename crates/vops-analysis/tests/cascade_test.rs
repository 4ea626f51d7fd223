use vops_analysis::display::{render_lock_cascade, render_slow_cascade};
use vops_analysis::{build_lock_cascade, build_slow_cascade, TimeWindow};
use vops_core::config::AnalysisConfig;
use vops_core::events::{LockAttempt, LockRelease, SlowEventList};

fn window() -> TimeWindow {
    TimeWindow::parse("2024-03-01 10:00:00", "2024-03-01 10:10:00").unwrap()
}

#[test]
fn lock_cascade_from_wire_records() {
    let attempts: Vec<LockAttempt> = serde_json::from_str(
        r#"[
        {"node_name":"v_db_node0002","start_time":"2024-03-01 10:02:00","duration":"00:00:40.25",
         "mode":"X","object":0,"object_name":"Global Catalog","session_id":"s2","transaction_id":45035996273705002},
        {"node_name":"v_db_node0002","start_time":"2024-03-01 10:02:30","duration":"00:01:00",
         "mode":"X","object":0,"object_name":"Global Catalog","session_id":"s3","transaction_id":45035996273705003},
        {"node_name":"v_db_node0001","start_time":"2024-03-01 09:20:00","duration":"00:00:50",
         "mode":"X","object":0,"object_name":"Global Catalog","session_id":"s1","transaction_id":1}
    ]"#,
    )
    .unwrap();
    let releases: Vec<LockRelease> = serde_json::from_str(
        r#"[
        {"node_name":"v_db_node0002","grant_time":"2024-03-01 10:01:00","time":"2024-03-01 10:03:00",
         "duration":"00:02:00","session_id":"s9","transaction_id":9,"user_name":"etl"}
    ]"#,
    )
    .unwrap();

    let cascade = build_lock_cascade(&attempts, &releases, &window(), &AnalysisConfig::default()).unwrap();

    // node0001's wait ended before the window opened.
    assert_eq!(cascade.len(), 1);
    let node = &cascade[0];
    assert_eq!(node.node_name, "v_db_node0002");
    assert_eq!(node.wait_start_time, "2024-03-01 10:02:00");
    assert_eq!(node.wait_end_time, "2024-03-01 10:03:30");
    assert_eq!(node.max_duration, "90.0000");
    assert_eq!(node.hold_locks[0].user_name, "etl");

    let json = serde_json::to_value(&cascade).unwrap();
    assert_eq!(json[0]["wait_locks"][1]["transaction_id"], "45035996273705003");

    let text = render_lock_cascade(&cascade);
    assert!(text.contains("user=etl"));
}

#[test]
fn slow_cascade_from_wire_records() {
    let list: SlowEventList = serde_json::from_str(
        r#"{"dc_slow_event_list":[
        {"timestamp":"2024-03-01 10:05:00","node_name":"v_db_node0001","session_id":"s1","txn_id":"1",
         "thread_id":"100","duration_us":"12000000","phases_duration_us":"GlobalCatalog lock wait[7f3a9c0d1e00]"},
        {"timestamp":"2024-03-01 10:04:58","node_name":"v_db_node0001","session_id":"s2","txn_id":"2",
         "thread_id":"139889702936064","duration_us":"8000000","phases_duration_us":"commit 8000000"},
        {"timestamp":"2024-03-01 10:04:55","node_name":"v_db_node0001","session_id":"s3","txn_id":"3",
         "thread_id":"5","duration_us":"100","phases_duration_us":"GlobalCatalog hold 100"},
        {"timestamp":"2024-03-01 10:04:59","node_name":"v_db_node0001","session_id":"NO NODE:0x1","txn_id":"0",
         "thread_id":"1","duration_us":"99000000","phases_duration_us":"hold"}
    ]}"#,
    )
    .unwrap();

    let cascade = build_slow_cascade(&list.events, &window(), &AnalysisConfig::default()).unwrap();

    assert_eq!(cascade.nodes.len(), 2);
    assert_eq!(cascade.nodes[0].event.thread_id, "100");
    let leaf = &cascade.nodes[1];
    assert!(leaf.leaf);
    assert_eq!(leaf.depth, 1);
    // Only the non-internal hold inside the leaf's run.
    assert_eq!(leaf.prior_hold_events.len(), 1);
    assert_eq!(leaf.prior_hold_events[0].session_id, "s3");
    assert_eq!(cascade.ids.session_list(), "s1,s2,s3");

    let json = serde_json::to_value(&cascade.nodes).unwrap();
    assert_eq!(json[1]["slow_event"]["thread_id"], "139889702936064");

    let text = render_slow_cascade(&cascade);
    assert_eq!(text.lines().count(), 2);
    assert!(text.lines().nth(1).unwrap().starts_with(" |- "));
}
