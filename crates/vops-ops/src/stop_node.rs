use async_trait::async_trait;
use std::collections::BTreeMap;
use vops_core::request::{HostRequest, HttpMethod};
use vops_engine::{ClusterOp, ErrorJoin, ExecContext, OpBase, OpCredentials, OpError};

/// Ask each node to shut itself down.
pub struct HttpsStopNodeOp {
    base: OpBase,
    credentials: OpCredentials,
    /// Node name -> host. Empty means every node recorded in the context.
    stop_nodes: BTreeMap<String, String>,
    drain_timeout_secs: Option<u64>,
}

impl HttpsStopNodeOp {
    pub fn new(
        stop_nodes: BTreeMap<String, String>,
        credentials: OpCredentials,
        drain_timeout_secs: Option<u64>,
    ) -> Result<Self, OpError> {
        let base = OpBase::new("HTTPSStopNodeOp", "Stop node", stop_nodes.values().cloned().collect());
        credentials.validate(&base.name)?;
        Ok(Self {
            base,
            credentials,
            stop_nodes,
            drain_timeout_secs,
        })
    }
}

#[async_trait]
impl ClusterOp for HttpsStopNodeOp {
    fn base(&self) -> &OpBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OpBase {
        &mut self.base
    }

    async fn prepare(&mut self, ctx: &mut ExecContext) -> Result<(), OpError> {
        let targets: Vec<(String, String)> = if self.stop_nodes.is_empty() {
            ctx.nodes_info
                .values()
                .map(|n| (n.name.clone(), n.address.clone()))
                .collect()
        } else {
            self.stop_nodes
                .iter()
                .filter(|(_, host)| !ctx.unreachable_hosts.contains(host))
                .map(|(n, h)| (n.clone(), h.clone()))
                .collect()
        };
        if targets.is_empty() {
            return Err(OpError::Config(format!(
                "[{}] list of nodes to be stopped is empty",
                self.base.name
            )));
        }

        self.base.hosts = targets.iter().map(|(_, h)| h.clone()).collect();
        ctx.dispatcher.setup(&self.base.hosts);
        let auth = self.credentials.to_auth();
        for (node_name, host) in &targets {
            let mut req = HostRequest::https(HttpMethod::Post, &format!("nodes/{node_name}/shutdown"))
                .with_auth(auth.clone());
            if let Some(secs) = self.drain_timeout_secs {
                req = req.with_query("timeout", secs.to_string());
            }
            self.base.cluster_request.insert(host, req);
        }
        Ok(())
    }

    async fn process_result(&mut self, _ctx: &mut ExecContext) -> Result<(), OpError> {
        self.base.check_credentials()?;
        let mut errors = ErrorJoin::new();
        for (host, result) in &self.base.cluster_request.results {
            self.base.log_response(host, result);

            // The HTTPS service may close before the response is flushed.
            if result.is_eof() {
                continue;
            }
            if !result.is_passing() {
                if result.is_connection_refused() {
                    tracing::info!("[{}] host {host} is already down", self.base.name);
                } else if let Some(err) = self.base.host_error(host, result) {
                    errors.push(err);
                }
                continue;
            }
            if let Err(e) = self
                .base
                .parse_and_check_response::<serde_json::Map<String, serde_json::Value>>(host, &result.content)
            {
                errors.push(e);
            }
        }
        errors.into_result()
    }
}
