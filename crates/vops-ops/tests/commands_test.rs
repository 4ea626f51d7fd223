use serde_json::json;
use std::sync::Arc;
use vops_core::config::EngineConfig;
use vops_core::result::HostResult;
use vops_engine::{OpCredentials, OpError, RunStatus};
use vops_ops::{fetch_up_nodes, stop_database, wait_for_nodes_up, DatabaseOptions, StopDbOptions};
use vops_transport::ScriptedTransport;

const HOSTS: [&str; 3] = ["10.0.0.1", "10.0.0.2", "10.0.0.3"];

fn fast() -> EngineConfig {
    EngineConfig {
        polling_interval_ms: 20,
        ..Default::default()
    }
}

fn options() -> DatabaseOptions {
    DatabaseOptions {
        db_name: "db".into(),
        hosts: HOSTS.iter().map(|h| h.to_string()).collect(),
        credentials: OpCredentials::password("dbadmin", "secret"),
        ..Default::default()
    }
}

fn nodes_body(state_of: impl Fn(&str) -> &'static str) -> serde_json::Value {
    let list: Vec<_> = HOSTS
        .iter()
        .enumerate()
        .map(|(i, h)| {
            json!({"name": format!("v_db_node000{}", i + 1), "address": h, "state": state_of(h),
                   "database": "db", "subcluster_name": "default_subcluster", "is_primary": i < 2})
        })
        .collect();
    json!({ "node_list": list })
}

fn node_state(host: &str, state: &str) -> serde_json::Value {
    json!({"node_list": [{"name": "n", "address": host, "state": state, "database": "db"}]})
}

#[tokio::test]
async fn stop_database_runs_discovery_shutdown_and_down_polling() {
    let t = Arc::new(ScriptedTransport::new());
    for h in HOSTS {
        t.respond_json(h, "nodes", nodes_body(|_| "UP"));
        // Up once, then the HTTPS service is gone.
        t.respond_json(h, &format!("nodes/{h}"), node_state(h, "UP"))
            .respond(h, &format!("nodes/{h}"), HostResult::exception(h, "connection refused"));
    }
    t.respond("10.0.0.1", "cluster/shutdown", HostResult::eof("10.0.0.1", "unexpected EOF"));

    let opts = StopDbOptions {
        database: options(),
        drain_seconds: None,
        polling_timeout_secs: 5,
    };
    let record = stop_database(t.clone(), fast(), &opts).await.unwrap();

    assert_eq!(record.status, RunStatus::Completed);
    assert_eq!(record.completed_ops, 3);
    // Shutdown goes to the lowest up host only.
    assert_eq!(t.call_count("cluster/shutdown"), 1);
    let calls = t.calls();
    let shutdown = calls
        .iter()
        .find(|(_, r)| r.endpoint == "v1/cluster/shutdown")
        .unwrap();
    assert_eq!(shutdown.0, "10.0.0.1");
}

#[tokio::test]
async fn stop_database_stops_at_discovery_failure() {
    let t = Arc::new(ScriptedTransport::new());
    let opts = StopDbOptions {
        database: options(),
        ..Default::default()
    };
    let err = stop_database(t.clone(), fast(), &opts).await.unwrap_err();
    assert_eq!(err.op_name(), Some("HTTPSGetUpNodesOp"));
    assert!(err.to_string().contains("no up node detected"));
    assert_eq!(t.call_count("cluster/shutdown"), 0);
}

#[tokio::test]
async fn fetch_up_nodes_reports_topology() {
    let t = Arc::new(ScriptedTransport::new());
    for h in HOSTS {
        t.respond_json(h, "nodes", nodes_body(|h| if h == "10.0.0.3" { "DOWN" } else { "UP" }));
    }
    let topo = fetch_up_nodes(t, fast(), &options()).await.unwrap();
    assert_eq!(topo.up_hosts, vec!["10.0.0.1", "10.0.0.2"]);
    assert_eq!(topo.primary_up_hosts, vec!["10.0.0.1", "10.0.0.2"]);
    assert_eq!(topo.up_sc_info["10.0.0.2"], "default_subcluster");
}

#[tokio::test]
async fn wait_for_nodes_up_times_out_on_a_stuck_node() {
    let t = Arc::new(ScriptedTransport::new());
    t.respond_json("10.0.0.1", "nodes/10.0.0.1", node_state("10.0.0.1", "UP"));
    t.respond_json("10.0.0.2", "nodes/10.0.0.2", node_state("10.0.0.2", "UP"));
    t.respond_json("10.0.0.3", "nodes/10.0.0.3", node_state("10.0.0.3", "RECOVERING"));

    let err = wait_for_nodes_up(t, fast(), &options(), 1).await.unwrap_err();
    match err.op_error() {
        Some(OpError::PollTimeout { hosts, .. }) => assert_eq!(hosts, &vec!["10.0.0.3".to_string()]),
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn engine_polling_timeout_bounds_the_wait() {
    let t = Arc::new(ScriptedTransport::new());
    for h in HOSTS {
        t.respond_json(h, &format!("nodes/{h}"), node_state(h, "DOWN"));
    }
    let config = EngineConfig {
        polling_timeout_secs: 1,
        poll_request_timeout_secs: 7,
        ..fast()
    };

    let err = wait_for_nodes_up(t.clone(), config, &options(), 0).await.unwrap_err();
    match err.op_error() {
        Some(OpError::PollTimeout { timeout_secs, hosts, .. }) => {
            assert_eq!(*timeout_secs, 1);
            assert_eq!(hosts.len(), 3);
        }
        other => panic!("unexpected: {other:?}"),
    }
    assert!(t.calls().iter().all(|(_, r)| r.timeout_secs == Some(7)));
}

#[tokio::test]
async fn options_are_validated_before_any_request() {
    let t = Arc::new(ScriptedTransport::new());
    let mut opts = options();
    opts.hosts.clear();
    assert!(fetch_up_nodes(t.clone(), fast(), &opts).await.is_err());
    assert!(t.calls().is_empty());
}
