use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use vops_core::node::MAIN_CLUSTER_SANDBOX;
use vops_core::request::{HostRequest, HttpMethod};
use vops_engine::operation::ResponseStatus;
use vops_engine::{ClusterOp, ErrorJoin, ExecContext, OpBase, OpError};

/// One node taking part in a catalog revive.
#[derive(Debug, Clone, Default)]
pub struct ReviveNode {
    /// Host the node will run on.
    pub host: String,
    /// Host the node ran on when the catalog was written.
    pub old_host: String,
    pub node_name: String,
    pub catalog_path: String,
    pub storage_locations: Vec<String>,
    pub is_primary: bool,
    /// Addresses the node advertises (host, private, broadcast).
    pub addresses: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RestorePoint {
    pub archive: String,
    pub index: i64,
    pub id: String,
}

#[derive(Serialize)]
struct LoadRemoteCatalogRequest<'a> {
    db_name: &'a str,
    storage_locations: &'a [String],
    communal_location: &'a str,
    catalog_path: &'a str,
    host: &'a str,
    node_name: &'a str,
    node_addresses: &'a BTreeMap<String, Vec<String>>,
    #[serde(skip_serializing_if = "no_parameters")]
    parameters: &'a BTreeMap<String, String>,
    #[serde(skip_serializing_if = "is_blank")]
    restore_point_archive: &'a str,
    #[serde(skip_serializing_if = "is_zero")]
    restore_point_index: i64,
    #[serde(skip_serializing_if = "is_blank")]
    restore_point_id: &'a str,
    #[serde(skip_serializing_if = "is_blank")]
    sandbox: &'a str,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

fn is_blank(s: &&str) -> bool {
    s.is_empty()
}

fn no_parameters(p: &&BTreeMap<String, String>) -> bool {
    p.is_empty()
}

/// Have every node load the catalog from communal storage. Succeeds once a
/// majority of the primary nodes report success.
pub struct NmaLoadRemoteCatalogOp {
    base: OpBase,
    db_name: String,
    communal_location: String,
    nodes: BTreeMap<String, ReviveNode>,
    parameters: BTreeMap<String, String>,
    restore_point: Option<RestorePoint>,
    sandbox: String,
    /// Zero uses the engine's default request timeout.
    timeout_secs: u64,
    primary_node_count: usize,
}

impl NmaLoadRemoteCatalogOp {
    pub fn new(
        db_name: &str,
        communal_location: &str,
        nodes: Vec<ReviveNode>,
        parameters: BTreeMap<String, String>,
        timeout_secs: u64,
    ) -> Self {
        let hosts = nodes.iter().map(|n| n.host.clone()).collect();
        let primary_node_count = nodes.iter().filter(|n| n.is_primary).count();
        Self {
            base: OpBase::new("NMALoadRemoteCatalogOp", "Load remote catalog", hosts),
            db_name: db_name.to_string(),
            communal_location: communal_location.to_string(),
            nodes: nodes.into_iter().map(|n| (n.host.clone(), n)).collect(),
            parameters,
            restore_point: None,
            sandbox: MAIN_CLUSTER_SANDBOX.to_string(),
            timeout_secs,
            primary_node_count,
        }
    }

    pub fn with_restore_point(mut self, point: RestorePoint) -> Self {
        self.restore_point = Some(point);
        self
    }

    pub fn with_sandbox(mut self, sandbox: &str) -> Self {
        self.sandbox = sandbox.to_string();
        self
    }

    fn request_body(&self, node: &ReviveNode, node_addresses: &BTreeMap<String, Vec<String>>) -> Result<String, OpError> {
        let point = self.restore_point.clone().unwrap_or_default();
        let request = LoadRemoteCatalogRequest {
            db_name: &self.db_name,
            storage_locations: &node.storage_locations,
            communal_location: &self.communal_location,
            catalog_path: &node.catalog_path,
            host: &node.old_host,
            node_name: &node.node_name,
            node_addresses,
            parameters: &self.parameters,
            restore_point_archive: &point.archive,
            restore_point_index: point.index,
            restore_point_id: &point.id,
            sandbox: &self.sandbox,
        };
        serde_json::to_string(&request).map_err(|e| {
            OpError::Config(format!(
                "[{}] fail to marshal request data to JSON string, detail {e}",
                self.base.name
            ))
        })
    }
}

#[async_trait]
impl ClusterOp for NmaLoadRemoteCatalogOp {
    fn base(&self) -> &OpBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OpBase {
        &mut self.base
    }

    async fn prepare(&mut self, ctx: &mut ExecContext) -> Result<(), OpError> {
        let node_addresses: BTreeMap<String, Vec<String>> = self
            .nodes
            .values()
            .map(|n| (n.node_name.clone(), n.addresses.clone()))
            .collect();

        ctx.dispatcher.setup(&self.base.hosts);
        let mut requests = Vec::with_capacity(self.base.hosts.len());
        for host in &self.base.hosts {
            let node = self.nodes.get(host).ok_or_else(|| {
                OpError::Config(format!("[{}] fail to find host {host} in host node map", self.base.name))
            })?;
            let body = self.request_body(node, &node_addresses)?;
            let mut req = HostRequest::nma(HttpMethod::Post, "catalog/revive").with_body(body);
            if self.timeout_secs > 0 {
                req = req.with_timeout(self.timeout_secs);
            }
            requests.push((host.clone(), req));
        }
        for (host, req) in requests {
            self.base.cluster_request.insert(&host, req);
        }
        Ok(())
    }

    async fn process_result(&mut self, _ctx: &mut ExecContext) -> Result<(), OpError> {
        let mut errors = ErrorJoin::new();
        let mut success_primaries = 0usize;

        for (host, result) in &self.base.cluster_request.results {
            self.base.log_response(host, result);

            if !result.is_passing() {
                errors.push(OpError::Failed(format!(
                    "[{}] HTTPS call failed on host {host}",
                    self.base.name
                )));
                if let Some(err) = self.base.host_error(host, result) {
                    errors.push(err);
                }
                continue;
            }

            let status: ResponseStatus = match self.base.parse_and_check_response(host, &result.content) {
                Ok(s) => s,
                Err(e) => {
                    errors.push(e);
                    continue;
                }
            };
            if let Err(e) = self.base.check_response_status_code(&status, host) {
                errors.push(e);
                continue;
            }
            if self.nodes.get(host).is_some_and(|n| n.is_primary) {
                success_primaries += 1;
            }
        }

        if !self.base.has_quorum(success_primaries, self.primary_node_count) {
            errors.push(OpError::Quorum {
                success: success_primaries,
                primaries: self.primary_node_count,
            });
            return errors.into_result();
        }
        // Enough primaries loaded the catalog; stragglers are only logged.
        if !errors.is_empty() {
            tracing::warn!(
                "[{}] catalog load failed on {} host(s), quorum still reached",
                self.base.name,
                errors.len()
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use vops_core::config::EngineConfig;
    use vops_core::result::HostResult;
    use vops_engine::ClusterOpEngine;
    use vops_transport::ScriptedTransport;

    fn nodes(primaries: usize, secondaries: usize) -> Vec<ReviveNode> {
        (0..primaries + secondaries)
            .map(|i| ReviveNode {
                host: format!("h{i}"),
                old_host: format!("old{i}"),
                node_name: format!("v_db_node000{i}"),
                catalog_path: "/data/catalog".into(),
                storage_locations: vec!["/data".into()],
                is_primary: i < primaries,
                addresses: vec![format!("h{i}")],
            })
            .collect()
    }

    async fn run(t: Arc<ScriptedTransport>, nodes: Vec<ReviveNode>) -> Result<(), vops_engine::EngineError> {
        let op = NmaLoadRemoteCatalogOp::new("db", "s3://bucket/db", nodes, BTreeMap::new(), 0);
        let mut engine = ClusterOpEngine::new(t, EngineConfig::default());
        engine.push(op);
        engine.run().await.map(|_| ())
    }

    #[tokio::test]
    async fn two_of_three_primaries_is_quorum() {
        let t = Arc::new(ScriptedTransport::new());
        t.respond_json("h0", "catalog/revive", serde_json::json!({"status": 0}))
            .respond_json("h1", "catalog/revive", serde_json::json!({"status": 0}))
            .respond("h2", "catalog/revive", HostResult::failure("h2", 500, "no space"));
        run(t, nodes(3, 0)).await.unwrap();
    }

    #[tokio::test]
    async fn secondaries_do_not_count() {
        let t = Arc::new(ScriptedTransport::new());
        for h in ["h0", "h2", "h3"] {
            t.respond_json(h, "catalog/revive", serde_json::json!({"status": 0}));
        }
        // 1 of 2 primaries (h0) plus both secondaries.
        let err = run(t, nodes(2, 2)).await.unwrap_err();
        assert!(err.to_string().contains("quorum not reached: 1 of 2"));
    }

    #[tokio::test]
    async fn non_zero_status_is_not_success() {
        let t = Arc::new(ScriptedTransport::new());
        t.respond_json("h0", "catalog/revive", serde_json::json!({"status": 1}));
        assert!(run(t, nodes(1, 0)).await.is_err());
    }

    #[tokio::test]
    async fn zero_timeout_falls_back_to_request_default() {
        let t = Arc::new(ScriptedTransport::new());
        t.respond_json("h0", "catalog/revive", serde_json::json!({"status": 0}));
        run(t.clone(), nodes(1, 0)).await.unwrap();
        assert_eq!(
            t.calls()[0].1.timeout_secs,
            Some(EngineConfig::default().request_timeout_secs)
        );
    }

    #[test]
    fn request_body_carries_node_details() {
        let op = NmaLoadRemoteCatalogOp::new("db", "s3://b", nodes(1, 0), BTreeMap::new(), 0).with_sandbox("sb1");
        let addresses = BTreeMap::from([("v_db_node0000".to_string(), vec!["h0".to_string()])]);
        let body: serde_json::Value =
            serde_json::from_str(&op.request_body(&op.nodes["h0"], &addresses).unwrap()).unwrap();
        assert_eq!(body["host"], "old0");
        assert_eq!(body["sandbox"], "sb1");
        assert_eq!(body["node_addresses"]["v_db_node0000"][0], "h0");
        assert!(body.get("parameters").is_none());
        assert!(body.get("restore_point_index").is_none());
    }
}
