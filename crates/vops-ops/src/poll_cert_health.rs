use async_trait::async_trait;
use std::time::Duration;
use vops_core::request::{HostRequest, HttpMethod};
use vops_engine::{poll_state, ClusterOp, ErrorJoin, ExecContext, OpBase, OpCredentials, OpError, PollingOp};

/// Wait for every host's HTTPS service to answer `health` after a TLS
/// configuration change restarts it.
pub struct HttpsPollCertificateHealthOp {
    base: OpBase,
    credentials: OpCredentials,
    timeout_secs: u64,
    ok_hosts: Vec<String>,
}

impl HttpsPollCertificateHealthOp {
    pub fn new(hosts: Vec<String>, credentials: OpCredentials) -> Result<Self, OpError> {
        let base = OpBase::new(
            "HTTPSPollCertificateHealthOp",
            "Wait for nodes to restart HTTPS service with new TLS config",
            hosts,
        );
        credentials.validate(&base.name)?;
        Ok(Self {
            base,
            credentials,
            timeout_secs: 0,
            ok_hosts: Vec::new(),
        })
    }

    /// Overrides the engine's polling timeout.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

#[async_trait]
impl ClusterOp for HttpsPollCertificateHealthOp {
    fn base(&self) -> &OpBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OpBase {
        &mut self.base
    }

    async fn prepare(&mut self, ctx: &mut ExecContext) -> Result<(), OpError> {
        if self.timeout_secs == 0 {
            self.timeout_secs = ctx.config.polling_timeout_secs;
        }
        ctx.dispatcher.setup(&self.base.hosts);
        let auth = self.credentials.to_auth();
        for host in &self.base.hosts {
            self.base.cluster_request.insert(
                host,
                HostRequest::https(HttpMethod::Get, "health")
                    .with_timeout(ctx.config.poll_request_timeout_secs)
                    .with_auth(auth.clone()),
            );
        }
        Ok(())
    }

    async fn process_result(&mut self, ctx: &mut ExecContext) -> Result<(), OpError> {
        tracing::info!(
            "[{}] expecting {} responsive host(s)",
            self.base.name,
            self.base.hosts.len()
        );
        poll_state(self, ctx).await
    }
}

impl PollingOp for HttpsPollCertificateHealthOp {
    fn polling_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn should_stop_polling(&mut self) -> Result<bool, OpError> {
        let mut errors = ErrorJoin::new();
        // Rebuilt each round so a host that answers once and then fails is
        // not counted.
        let mut ok_hosts = Vec::new();

        for (host, result) in &self.base.cluster_request.results {
            self.base.log_response(host, result);

            if result.is_unauthorized() {
                tracing::info!("[{}] HTTPS service on {host} reports unauthorized request, continuing to poll", self.base.name);
                continue;
            }
            if result.is_failing() {
                if let Some(err) = result.error.clone() {
                    errors.push(err);
                }
                continue;
            }
            if result.is_exception() || result.is_eof() {
                tracing::info!(
                    "[{}] HTTPS service on {host} is not reachable yet, possibly restarting",
                    self.base.name
                );
                continue;
            }
            ok_hosts.push(host.clone());
        }
        self.ok_hosts = ok_hosts;
        errors.into_result()?;

        let healthy = self.ok_hosts.len();
        if healthy < self.base.hosts.len() {
            self.base.update_spinner_message(format!(
                "{healthy} host(s) responsive, expecting {} responsive host(s)",
                self.base.hosts.len()
            ));
            return Ok(false);
        }
        tracing::info!("[{}] all nodes are responsive", self.base.name);
        Ok(true)
    }

    fn outstanding_hosts(&self) -> Vec<String> {
        self.base
            .hosts
            .iter()
            .filter(|h| !self.ok_hosts.contains(h))
            .cloned()
            .collect()
    }
}
