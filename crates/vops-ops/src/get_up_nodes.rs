//! Discover which hosts are up by asking every host for the node list.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use vops_core::node::{NodeState, NodesStateInfo, MAIN_CLUSTER_SANDBOX};
use vops_core::request::{HostRequest, HttpMethod};
use vops_engine::{ClusterOp, ErrorJoin, ExecContext, OpBase, OpCredentials, OpError};

pub struct HttpsGetUpNodesOp {
    base: OpBase,
    db_name: String,
    credentials: OpCredentials,
    no_up_hosts_ok: bool,
    /// Read every response instead of stopping at the first one that
    /// reports up nodes; required when sandbox topology matters.
    full_scan: bool,
    /// Reject responses listing hosts we did not ask about.
    validate_hosts: bool,
}

impl HttpsGetUpNodesOp {
    pub fn new(
        db_name: &str,
        hosts: Vec<String>,
        credentials: OpCredentials,
    ) -> Result<Self, OpError> {
        let base = OpBase::new(
            "HTTPSGetUpNodesOp",
            "Collect information for all up nodes",
            hosts,
        );
        credentials.validate(&base.name)?;
        Ok(Self {
            base,
            db_name: db_name.to_string(),
            credentials,
            no_up_hosts_ok: false,
            full_scan: false,
            validate_hosts: false,
        })
    }

    pub fn allow_no_up_hosts(mut self) -> Self {
        self.no_up_hosts_ok = true;
        self
    }

    pub fn full_scan(mut self) -> Self {
        self.full_scan = true;
        self
    }

    pub fn validate_hosts(mut self) -> Self {
        self.validate_hosts = true;
        self
    }

    fn check_hosts(&self, nodes: &NodesStateInfo) -> Result<(), OpError> {
        if let Some(other) = nodes.node_list.iter().find(|n| n.database != self.db_name) {
            return Err(OpError::Failed(format!(
                "[{}] unexpected database {:?} is running on hosts {:?}. Please ensure the provided hosts or database name are correct",
                self.base.name, other.database, self.base.hosts
            )));
        }
        let db_hosts: BTreeSet<&str> = nodes.node_list.iter().map(|n| n.address.as_str()).collect();
        let unexpected: Vec<&String> = self
            .base
            .hosts
            .iter()
            .filter(|h| !db_hosts.contains(h.as_str()))
            .collect();
        if !unexpected.is_empty() {
            return Err(OpError::Failed(format!(
                "[{}] database {:?} does not contain any nodes on the hosts {unexpected:?}. Please ensure the hosts are correct",
                self.base.name, self.db_name
            )));
        }
        Ok(())
    }
}

#[derive(Default)]
struct Topology {
    up_hosts: BTreeSet<String>,
    compute_hosts: BTreeSet<String>,
    up_sc_info: BTreeMap<String, String>,
    sandbox_info: BTreeMap<String, String>,
}

#[async_trait]
impl ClusterOp for HttpsGetUpNodesOp {
    fn base(&self) -> &OpBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OpBase {
        &mut self.base
    }

    async fn prepare(&mut self, ctx: &mut ExecContext) -> Result<(), OpError> {
        ctx.dispatcher.setup(&self.base.hosts);
        let auth = self.credentials.to_auth();
        for host in &self.base.hosts {
            self.base.cluster_request.insert(
                host,
                HostRequest::https(HttpMethod::Get, "nodes").with_auth(auth.clone()),
            );
        }
        Ok(())
    }

    async fn process_result(&mut self, ctx: &mut ExecContext) -> Result<(), OpError> {
        for (host, result) in &self.base.cluster_request.results {
            if result.is_credential_error() {
                ctx.auth_failed_hosts.insert(host.clone());
            }
        }
        self.base.check_credentials()?;

        let mut errors = ErrorJoin::new();
        let mut topo = Topology::default();
        let mut exception_hosts = Vec::new();
        let mut down_hosts = Vec::new();

        for (host, result) in &self.base.cluster_request.results {
            self.base.log_response(host, result);

            if !result.is_passing() {
                if let Some(err) = self.base.host_error(host, result) {
                    errors.push(err);
                }
                if result.is_unauthorized()
                    || result.is_internal_error()
                    || result.has_precondition_failed()
                {
                    exception_hosts.push(host.clone());
                } else {
                    down_hosts.push(host.clone());
                }
                continue;
            }

            let nodes: NodesStateInfo = match self.base.parse_and_check_response(host, &result.content) {
                Ok(n) => n,
                Err(e) => {
                    errors.push(e);
                    continue;
                }
            };

            if self.validate_hosts {
                if let Err(e) = self.check_hosts(&nodes) {
                    errors.push(e);
                    break;
                }
            }

            for node in &nodes.node_list {
                if node.database != self.db_name {
                    errors.push(OpError::Failed(format!(
                        "[{}] database {} is running on host {host}, rather than database {}",
                        self.base.name, node.database, self.db_name
                    )));
                    return errors.into_result();
                }
                ctx.host_sandbox_map
                    .insert(node.address.clone(), node.sandbox.clone());
                match node.state {
                    NodeState::Up => {
                        topo.up_hosts.insert(node.address.clone());
                        topo.up_sc_info
                            .insert(node.address.clone(), node.subcluster_name.clone());
                        topo.sandbox_info
                            .insert(node.address.clone(), node.sandbox.clone());
                        ctx.nodes_info.insert(node.address.clone(), node.clone());
                    }
                    NodeState::Compute => {
                        topo.compute_hosts.insert(node.address.clone());
                    }
                    _ => {}
                }
            }

            if !topo.up_hosts.is_empty() && !self.full_scan {
                break;
            }
        }

        ctx.compute_hosts = topo.compute_hosts.into_iter().collect();
        ctx.up_sc_info = topo.up_sc_info;
        ctx.sandbox_info = topo.sandbox_info;

        if ctx.target_sandbox != MAIN_CLUSTER_SANDBOX
            && !ctx.sandbox_info.values().any(|sb| *sb == ctx.target_sandbox)
        {
            tracing::error!(
                "[{}] there are no UP nodes in the sandbox {}. The db {} is already down",
                self.base.name,
                ctx.target_sandbox,
                self.db_name
            );
        }

        if !topo.up_hosts.is_empty() {
            // BTreeSet iteration is sorted, so the first entry is a stable initiator.
            ctx.up_hosts = topo.up_hosts.into_iter().collect();
            return Ok(());
        }

        if !exception_hosts.is_empty() {
            tracing::error!(
                "[{}] fail to call https endpoint of database {} on hosts {exception_hosts:?}",
                self.base.name,
                self.db_name
            );
            errors.push(OpError::Failed(format!(
                "failed to access node on hosts {exception_hosts:?}"
            )));
        }
        if !down_hosts.is_empty() {
            tracing::error!(
                "[{}] did not detect database {} running on hosts {down_hosts:?}",
                self.base.name,
                self.db_name
            );
            self.base.update_spinner_message(format!(
                "did not detect database {} running on hosts {down_hosts:?}",
                self.db_name
            ));
            errors.push(OpError::Failed(format!(
                "no up node detected on hosts {down_hosts:?}"
            )));
        }

        if self.no_up_hosts_ok {
            return Ok(());
        }
        errors.into_result()
    }
}
