use async_trait::async_trait;
use std::time::Duration;
use vops_core::node::{NodeState, NodesStateInfo};
use vops_core::request::{HostRequest, HttpMethod};
use vops_engine::{poll_state, ClusterOp, ExecContext, OpBase, OpCredentials, OpError, PollingOp};

/// Wait until every host reports its node UP, or with `down()` until none
/// of them answers as up any more.
pub struct HttpsPollNodeStateOp {
    base: OpBase,
    credentials: OpCredentials,
    timeout_secs: u64,
    request_timeout_secs: Option<u64>,
    check_down: bool,
    /// When set, only these hosts are polled; an empty intersection skips
    /// the operation.
    permanent_hosts: Option<Vec<String>>,
    pending: Vec<String>,
}

impl HttpsPollNodeStateOp {
    /// `timeout_secs == 0` uses the engine's polling timeout.
    pub fn new(hosts: Vec<String>, credentials: OpCredentials, timeout_secs: u64) -> Result<Self, OpError> {
        let description = format!("Wait for {} node(s) to come up", hosts.len());
        let base = OpBase::new("HTTPSPollNodeStateOp", &description, hosts);
        credentials.validate(&base.name)?;
        Ok(Self {
            base,
            credentials,
            timeout_secs,
            request_timeout_secs: None,
            check_down: false,
            permanent_hosts: None,
            pending: Vec::new(),
        })
    }

    pub fn down(mut self) -> Self {
        self.check_down = true;
        self.base.description = format!("Wait for {} node(s) to go DOWN", self.base.hosts.len());
        self
    }

    pub fn with_permanent_hosts(mut self, hosts: Vec<String>) -> Self {
        self.permanent_hosts = Some(hosts);
        self
    }

    pub fn with_request_timeout(mut self, secs: u64) -> Self {
        self.request_timeout_secs = Some(secs);
        self
    }

    fn stop_polling_for_up(&mut self) -> Result<bool, OpError> {
        let name = self.base.name.clone();
        let mut pending = Vec::new();

        for (host, result) in &self.base.cluster_request.results {
            if result.is_timeout() {
                return Err(OpError::Failed(format!(
                    "[{name}] cannot connect to host {host}, please check if the host is still alive"
                )));
            }
            if result.is_credential_error() {
                return Err(OpError::Unauthorized { host: host.clone() });
            }
            if !result.is_passing() {
                pending.push(host.clone());
                continue;
            }

            let nodes: NodesStateInfo = self.base.parse_and_check_response(host, &result.content)?;
            if nodes.node_list.len() != 1 {
                return Err(OpError::Failed(format!(
                    "[{name}] expect one node's information, but got {} nodes' information from HTTPS /v1/nodes/<host> endpoint on host {host}",
                    nodes.node_list.len()
                )));
            }
            if nodes.node_list[0].state != NodeState::Up {
                pending.push(host.clone());
            }
        }

        let up = self.base.hosts.len().saturating_sub(pending.len());
        self.pending = pending;
        if !self.pending.is_empty() {
            tracing::info!("[{name}] {up} host(s) up");
            self.base
                .update_spinner_message(format!("{up} host(s) up, expecting {} up host(s)", self.base.hosts.len()));
            return Ok(false);
        }
        tracing::info!("[{name}] all nodes are up");
        Ok(true)
    }

    fn stop_polling_for_down(&mut self) -> Result<bool, OpError> {
        let name = self.base.name.clone();
        let mut still_up = Vec::new();

        for (host, result) in &self.base.cluster_request.results {
            if result.is_timeout() {
                return Err(OpError::Failed(format!(
                    "[{name}] cannot connect to host {host}, please check if the host is still alive"
                )));
            }
            if result.is_credential_error() {
                return Err(OpError::Unauthorized { host: host.clone() });
            }
            // Refused connections and failures without a running HTTPS
            // service mean the node is gone.
            if (result.is_failing() && !result.is_http_running()) || result.is_exception() {
                continue;
            }
            still_up.push(host.clone());
        }

        let up = still_up.len();
        self.pending = still_up;
        if up != 0 {
            tracing::info!("[{name}] {up} host(s) up");
            self.base.update_spinner_message(format!(
                "{up} host(s) up, expecting {} host(s) to be down",
                self.base.hosts.len()
            ));
            return Ok(false);
        }
        tracing::info!("[{name}] all nodes are down");
        Ok(true)
    }
}

#[async_trait]
impl ClusterOp for HttpsPollNodeStateOp {
    fn base(&self) -> &OpBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OpBase {
        &mut self.base
    }

    async fn prepare(&mut self, ctx: &mut ExecContext) -> Result<(), OpError> {
        if let Some(permanent) = &self.permanent_hosts {
            self.base.hosts.retain(|h| permanent.contains(h));
            if self.base.hosts.is_empty() {
                self.base.skip_execute = true;
                return Ok(());
            }
        }

        if self.timeout_secs == 0 {
            self.timeout_secs = ctx.config.polling_timeout_secs;
        }
        let request_timeout = self
            .request_timeout_secs
            .unwrap_or(ctx.config.poll_request_timeout_secs);

        ctx.dispatcher.setup(&self.base.hosts);
        let auth = self.credentials.to_auth();
        for host in &self.base.hosts {
            self.base.cluster_request.insert(
                host,
                HostRequest::https(HttpMethod::Get, &format!("nodes/{host}"))
                    .with_timeout(request_timeout)
                    .with_auth(auth.clone()),
            );
        }
        Ok(())
    }

    async fn process_result(&mut self, ctx: &mut ExecContext) -> Result<(), OpError> {
        let expecting = if self.check_down { "down" } else { "up" };
        tracing::info!(
            "[{}] expecting {} {expecting} host(s)",
            self.base.name,
            self.base.hosts.len()
        );
        poll_state(self, ctx).await
    }
}

impl PollingOp for HttpsPollNodeStateOp {
    fn polling_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn should_stop_polling(&mut self) -> Result<bool, OpError> {
        if self.check_down {
            self.stop_polling_for_down()
        } else {
            self.stop_polling_for_up()
        }
    }

    fn outstanding_hosts(&self) -> Vec<String> {
        self.pending.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use vops_core::config::EngineConfig;
    use vops_core::result::HostResult;
    use vops_engine::ClusterOpEngine;
    use vops_transport::ScriptedTransport;

    fn fast() -> EngineConfig {
        EngineConfig {
            polling_interval_ms: 20,
            ..Default::default()
        }
    }

    fn state(host: &str, s: &str) -> serde_json::Value {
        json!({"node_list": [{"name": format!("n_{host}"), "address": host, "state": s, "database": "db"}]})
    }

    fn hosts(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn waits_until_all_up() {
        let t = Arc::new(ScriptedTransport::new());
        t.respond_json("h1", "nodes/h1", state("h1", "UP"));
        t.respond_json("h2", "nodes/h2", state("h2", "DOWN"))
            .respond_json("h2", "nodes/h2", state("h2", "DOWN"))
            .respond_json("h2", "nodes/h2", state("h2", "UP"));

        let op = HttpsPollNodeStateOp::new(hosts(&["h1", "h2"]), OpCredentials::certificate(), 5).unwrap();
        let mut engine = ClusterOpEngine::new(t.clone(), fast());
        engine.push(op);
        engine.run().await.unwrap();
        assert_eq!(t.call_count("nodes/h2"), 3);
    }

    #[tokio::test]
    async fn timeout_reports_the_host_still_down() {
        let t = Arc::new(ScriptedTransport::new());
        t.respond_json("h1", "nodes/h1", state("h1", "UP"))
            .respond_json("h2", "nodes/h2", state("h2", "DOWN"));

        let op = HttpsPollNodeStateOp::new(hosts(&["h1", "h2"]), OpCredentials::certificate(), 1).unwrap();
        let mut engine = ClusterOpEngine::new(t, fast());
        engine.push(op);
        let err = engine.run().await.unwrap_err();
        match err.op_error() {
            Some(OpError::PollTimeout { hosts, .. }) => assert_eq!(hosts, &vec!["h2".to_string()]),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn explicit_request_timeout_wins_over_config() {
        let t = Arc::new(ScriptedTransport::new());
        t.respond_json("h1", "nodes/h1", state("h1", "UP"));
        let op = HttpsPollNodeStateOp::new(hosts(&["h1"]), OpCredentials::certificate(), 0)
            .unwrap()
            .with_request_timeout(3);
        let mut engine = ClusterOpEngine::new(t.clone(), fast());
        engine.push(op);
        engine.run().await.unwrap();
        assert_eq!(t.calls()[0].1.timeout_secs, Some(3));
    }

    #[tokio::test]
    async fn wrong_password_fails_immediately() {
        let t = Arc::new(ScriptedTransport::new());
        t.respond("h1", "nodes/h1", HostResult::failure("h1", 401, "Wrong password"));
        let op = HttpsPollNodeStateOp::new(hosts(&["h1"]), OpCredentials::password("u", "p"), 30).unwrap();
        let mut engine = ClusterOpEngine::new(t.clone(), fast());
        engine.push(op);
        let err = engine.run().await.unwrap_err();
        assert!(matches!(err.op_error(), Some(OpError::Unauthorized { .. })));
        assert_eq!(t.call_count("nodes/h1"), 1);
    }

    #[tokio::test]
    async fn request_timeout_is_terminal() {
        let t = Arc::new(ScriptedTransport::new());
        t.respond("h1", "nodes/h1", HostResult::timeout("h1", 30));
        let op = HttpsPollNodeStateOp::new(hosts(&["h1"]), OpCredentials::certificate(), 30).unwrap();
        let mut engine = ClusterOpEngine::new(t, fast());
        engine.push(op);
        let err = engine.run().await.unwrap_err().to_string();
        assert!(err.contains("cannot connect to host h1"));
    }

    #[tokio::test]
    async fn multi_node_payload_is_terminal() {
        let t = Arc::new(ScriptedTransport::new());
        t.respond_json(
            "h1",
            "nodes/h1",
            json!({"node_list": [{"name": "a", "address": "h1", "state": "UP"},
                                 {"name": "b", "address": "h2", "state": "UP"}]}),
        );
        let op = HttpsPollNodeStateOp::new(hosts(&["h1"]), OpCredentials::certificate(), 30).unwrap();
        let mut engine = ClusterOpEngine::new(t, fast());
        engine.push(op);
        let err = engine.run().await.unwrap_err().to_string();
        assert!(err.contains("expect one node's information"));
    }

    #[tokio::test]
    async fn down_mode_stops_when_nothing_answers() {
        let t = Arc::new(ScriptedTransport::new());
        t.respond_json("h1", "nodes/h1", state("h1", "UP"))
            .respond("h1", "nodes/h1", HostResult::exception("h1", "dial tcp h1: connect: connection refused"));
        t.respond("h2", "nodes/h2", HostResult::failure("h2", 503, "unavailable"));

        let op = HttpsPollNodeStateOp::new(hosts(&["h1", "h2"]), OpCredentials::certificate(), 5)
            .unwrap()
            .down();
        let mut engine = ClusterOpEngine::new(t.clone(), fast());
        engine.push(op);
        engine.run().await.unwrap();
        assert_eq!(t.call_count("nodes/h1"), 2);
    }

    #[tokio::test]
    async fn down_mode_treats_running_https_as_up() {
        let t = Arc::new(ScriptedTransport::new());
        t.respond("h1", "nodes/h1", HostResult::failure("h1", 412, "not joined"));
        let op = HttpsPollNodeStateOp::new(hosts(&["h1"]), OpCredentials::certificate(), 1)
            .unwrap()
            .down();
        let mut engine = ClusterOpEngine::new(t, fast());
        engine.push(op);
        assert!(engine.run().await.is_err());
    }

    #[tokio::test]
    async fn no_permanent_hosts_skips_polling() {
        let t = Arc::new(ScriptedTransport::new());
        let op = HttpsPollNodeStateOp::new(hosts(&["h1"]), OpCredentials::certificate(), 5)
            .unwrap()
            .with_permanent_hosts(hosts(&["h9"]));
        let mut engine = ClusterOpEngine::new(t.clone(), fast());
        engine.push(op);
        let record = engine.run().await.unwrap();
        assert_eq!(record.skipped_ops, 1);
        assert!(t.calls().is_empty());
    }
}
