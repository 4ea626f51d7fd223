use async_trait::async_trait;
use std::collections::BTreeSet;
use vops_core::node::MAIN_CLUSTER_SANDBOX;
use vops_core::request::{HostRequest, HttpMethod};
use vops_engine::{ClusterOp, ErrorJoin, ExecContext, OpBase, OpCredentials, OpError};

const MOVEOUT_COMPLETE: &str = "Shutdown: moveout complete";
const SYNC_COMPLETE: &str = "Shutdown: sync complete";

/// Shut the database down through one up host per sandbox (or of the main
/// cluster).
pub struct HttpsStopDbOp {
    base: OpBase,
    credentials: OpCredentials,
    sandbox: String,
    main_cluster_only: bool,
    is_eon: bool,
    drain_timeout_secs: Option<u64>,
}

impl HttpsStopDbOp {
    pub fn new(
        credentials: OpCredentials,
        sandbox: &str,
        main_cluster_only: bool,
        is_eon: bool,
        drain_timeout_secs: Option<u64>,
    ) -> Result<Self, OpError> {
        let base = OpBase::new("HTTPSStopDBOp", "Stop database", Vec::new());
        credentials.validate(&base.name)?;
        Ok(Self {
            base,
            credentials,
            sandbox: sandbox.to_string(),
            main_cluster_only,
            is_eon,
            // Zero means no draining.
            drain_timeout_secs: drain_timeout_secs.filter(|t| *t != 0),
        })
    }

    /// One up host of the target sandbox; otherwise one per sandbox followed
    /// by one of the main cluster so sandboxes stop first.
    fn pick_hosts(&self, ctx: &ExecContext) -> Vec<String> {
        let mut main_host = None;
        let mut hosts = Vec::new();
        let mut seen = BTreeSet::new();

        for (host, sandbox) in &ctx.sandbox_info {
            if *sandbox != MAIN_CLUSTER_SANDBOX && *sandbox == self.sandbox {
                return vec![host.clone()];
            }
            if *sandbox == MAIN_CLUSTER_SANDBOX {
                main_host.get_or_insert_with(|| host.clone());
            } else if seen.insert(sandbox.clone()) {
                hosts.push(host.clone());
            }
        }

        if self.main_cluster_only {
            return main_host.into_iter().collect();
        }
        if self.sandbox == MAIN_CLUSTER_SANDBOX {
            hosts.extend(main_host);
        }
        hosts
    }

    fn expected_detail(&self) -> &'static str {
        if self.is_eon {
            SYNC_COMPLETE
        } else {
            MOVEOUT_COMPLETE
        }
    }
}

#[async_trait]
impl ClusterOp for HttpsStopDbOp {
    fn base(&self) -> &OpBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OpBase {
        &mut self.base
    }

    async fn prepare(&mut self, ctx: &mut ExecContext) -> Result<(), OpError> {
        if ctx.sandbox_info.is_empty() && ctx.up_hosts.is_empty() {
            return Err(OpError::Config(format!(
                "[{}] cannot find any up hosts in the execution context",
                self.base.name
            )));
        }
        let mut hosts = self.pick_hosts(ctx);
        if hosts.is_empty() {
            hosts.extend(ctx.initiator().map(str::to_string));
        }
        if hosts.is_empty() {
            return Err(OpError::Config(format!(
                "[{}] no up host found for sandbox {:?}",
                self.base.name, self.sandbox
            )));
        }

        self.base.hosts = hosts;
        ctx.dispatcher.setup(&self.base.hosts);
        let auth = self.credentials.to_auth();
        for host in &self.base.hosts {
            let mut req = HostRequest::https(HttpMethod::Post, "cluster/shutdown").with_auth(auth.clone());
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

            // Shutdown often closes the connection before replying.
            if result.is_eof() {
                continue;
            }
            if !result.is_passing() {
                if let Some(err) = self.base.host_error(host, result) {
                    errors.push(err);
                }
                if result.is_timeout() {
                    errors.push(OpError::Failed(
                        "hint: use NMA endpoint /v1/vertica-process/signal?signal_type=kill to terminate a hanging \
                         Vertica process on the failed host"
                            .to_string(),
                    ));
                }
                continue;
            }

            let response: serde_json::Map<String, serde_json::Value> =
                match self.base.parse_and_check_response(host, &result.content) {
                    Ok(r) => r,
                    Err(e) => {
                        errors.push(e);
                        continue;
                    }
                };
            // Draining shutdowns report a free-form progress log.
            if self.drain_timeout_secs.is_some() {
                continue;
            }
            let detail = response.get("detail").and_then(|d| d.as_str()).unwrap_or_default();
            if detail != self.expected_detail() {
                errors.push(OpError::Failed(format!(
                    "[{}] response detail should be '{}' but got '{detail}'",
                    self.base.name,
                    self.expected_detail()
                )));
            }
        }
        errors.into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use vops_core::config::EngineConfig;
    use vops_core::result::HostResult;
    use vops_transport::ScriptedTransport;

    fn ctx_with(sandboxes: &[(&str, &str)]) -> ExecContext {
        let mut ctx = ExecContext::new(Arc::new(ScriptedTransport::new()), EngineConfig::default());
        for (h, sb) in sandboxes {
            ctx.sandbox_info.insert(h.to_string(), sb.to_string());
            ctx.up_hosts.push(h.to_string());
        }
        ctx
    }

    fn op(sandbox: &str, main_only: bool) -> HttpsStopDbOp {
        HttpsStopDbOp::new(OpCredentials::certificate(), sandbox, main_only, false, None).unwrap()
    }

    #[test]
    fn host_selection_orders_sandboxes_before_main() {
        let ctx = ctx_with(&[("h1", ""), ("h2", ""), ("h3", "sb1"), ("h4", "sb1"), ("h5", "sb2")]);
        assert_eq!(op("", false).pick_hosts(&ctx), vec!["h3", "h5", "h1"]);
        assert_eq!(op("sb1", false).pick_hosts(&ctx), vec!["h3"]);
        assert_eq!(op("", true).pick_hosts(&ctx), vec!["h1"]);
    }

    #[tokio::test]
    async fn no_up_hosts_is_a_config_error() {
        let mut ctx = ctx_with(&[]);
        let mut stop = op("", false);
        assert!(matches!(stop.prepare(&mut ctx).await, Err(OpError::Config(_))));
    }

    #[tokio::test]
    async fn eof_is_success_and_detail_is_checked() {
        let t = Arc::new(ScriptedTransport::new());
        t.respond("h1", "cluster/shutdown", HostResult::eof("h1", "unexpected EOF"))
            .respond_json("h3", "cluster/shutdown", serde_json::json!({"detail": "Shutdown: sync complete"}));
        let mut ctx = ExecContext::new(t, EngineConfig::default());
        ctx.sandbox_info.insert("h1".into(), String::new());
        ctx.sandbox_info.insert("h3".into(), "sb1".into());

        let mut stop = op("", false);
        stop.prepare(&mut ctx).await.unwrap();
        stop.execute(&mut ctx).await.unwrap();
        let err = stop.process_result(&mut ctx).await.unwrap_err();
        assert!(err.to_string().contains("should be 'Shutdown: moveout complete'"));
    }
}
