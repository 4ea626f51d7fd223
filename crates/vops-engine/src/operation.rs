//! The four-phase operation contract and the base every operation embeds.

use crate::context::ExecContext;
use crate::OpError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use vops_core::node::MAIN_CLUSTER_SANDBOX;
use vops_core::request::{Auth, ClusterRequest};
use vops_core::result::HostResult;
use vops_transport::Spinner;

/// Status body returned by endpoints that report success as `{"status": 0}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponseStatus {
    #[serde(default)]
    pub status: i64,
}

/// A unit of remote work. The engine calls `prepare`, then (unless the
/// base's skip flag is set) `execute` and `process_result`, then `finalize`.
#[async_trait]
pub trait ClusterOp: Send {
    fn base(&self) -> &OpBase;
    fn base_mut(&mut self) -> &mut OpBase;

    fn name(&self) -> &str {
        &self.base().name
    }

    /// Resolve target hosts, build requests and bind the dispatcher.
    async fn prepare(&mut self, ctx: &mut ExecContext) -> Result<(), OpError>;

    /// Send the prepared requests.
    async fn execute(&mut self, ctx: &mut ExecContext) -> Result<(), OpError> {
        self.base_mut().run_execute(ctx).await
    }

    /// Interpret the host results and update the context.
    async fn process_result(&mut self, ctx: &mut ExecContext) -> Result<(), OpError>;

    async fn finalize(&mut self, _ctx: &mut ExecContext) -> Result<(), OpError> {
        Ok(())
    }
}

/// `success` primaries acknowledged out of `primaries`: strict majority.
pub fn has_quorum(success: usize, primaries: usize) -> bool {
    success >= primaries / 2 + 1
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// HTTPS credentials of an operation. Without a password, requests use the
/// client certificate configured on the transport.
#[derive(Clone, Default)]
pub struct OpCredentials {
    pub username: String,
    pub password: Option<String>,
}

impl OpCredentials {
    pub fn password(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: Some(password.to_string()),
        }
    }

    pub fn certificate() -> Self {
        Self::default()
    }

    pub fn uses_password(&self) -> bool {
        self.password.is_some()
    }

    pub fn validate(&self, op_name: &str) -> Result<(), OpError> {
        validate_username_and_password(op_name, self.uses_password(), &self.username)
    }

    pub fn to_auth(&self) -> Auth {
        match &self.password {
            Some(pw) => Auth::Password {
                username: self.username.clone(),
                password: pw.clone(),
            },
            None => Auth::Certificate,
        }
    }
}

impl std::fmt::Debug for OpCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpCredentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "******"))
            .finish()
    }
}

pub fn validate_username_and_password(
    op_name: &str,
    use_password: bool,
    username: &str,
) -> Result<(), OpError> {
    if use_password && username.trim().is_empty() {
        return Err(OpError::Config(format!(
            "[{op_name}] should provide a username for password authentication"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// OpBase
// ---------------------------------------------------------------------------

/// Fields and helpers shared by every operation.
#[derive(Debug)]
pub struct OpBase {
    /// Stable identifier used in logs and error attribution.
    pub name: String,
    pub description: String,
    pub hosts: Vec<String>,
    pub cluster_request: ClusterRequest,
    /// Set during `prepare` when there is nothing to do.
    pub skip_execute: bool,
    pub spinner: Option<Spinner>,
}

impl OpBase {
    pub fn new(name: &str, description: &str, hosts: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            hosts,
            cluster_request: ClusterRequest::new(name),
            skip_execute: false,
            spinner: None,
        }
    }

    /// Reset the request set for a fresh run.
    pub fn setup_basic_info(&mut self) {
        self.cluster_request = ClusterRequest::new(&self.name);
    }

    pub async fn run_execute(&mut self, ctx: &mut ExecContext) -> Result<(), OpError> {
        ctx.dispatcher
            .send_request(&mut self.cluster_request, self.spinner.as_ref())
            .await
            .map_err(|e| {
                tracing::error!("[{}] fail to dispatch request: {e}", self.name);
                OpError::from(e)
            })
    }

    pub fn log_prepare(&self) {
        tracing::debug!("[{}] prepare() called", self.name);
    }

    pub fn log_execute(&self) {
        tracing::debug!("[{}] execute() called", self.name);
    }

    pub fn log_finalize(&self) {
        tracing::debug!("[{}] finalize() called", self.name);
    }

    pub fn log_response(&self, host: &str, result: &HostResult) {
        match &result.error {
            Some(err) => tracing::error!(
                "[{}] result from host {host} summary {}, details: {err}",
                self.name,
                result.status.as_str()
            ),
            None => tracing::debug!(
                "[{}] request succeeded on host {host}, status code {}",
                self.name,
                result.status_code
            ),
        }
    }

    /// Error for a non-passing result; 401 gets a credential message.
    pub fn host_error(&self, host: &str, result: &HostResult) -> Option<OpError> {
        if result.is_unauthorized() {
            return Some(OpError::Unauthorized {
                host: host.to_string(),
            });
        }
        result.error.clone().map(OpError::Host)
    }

    /// Fails on the first host that rejected the credentials. Retrying the
    /// remaining hosts with the same credentials cannot succeed.
    pub fn check_credentials(&self) -> Result<(), OpError> {
        match self
            .cluster_request
            .results
            .iter()
            .find(|(_, r)| r.is_credential_error())
        {
            Some((host, _)) => {
                tracing::error!("[{}] credentials rejected by host {host}", self.name);
                Err(OpError::Unauthorized { host: host.clone() })
            }
            None => Ok(()),
        }
    }

    pub fn parse_and_check_response<T: DeserializeOwned>(
        &self,
        host: &str,
        content: &str,
    ) -> Result<T, OpError> {
        serde_json::from_str(content).map_err(|e| {
            tracing::error!(
                "[{}] fail to parse response on host {host}: {e}, original content: {content}",
                self.name
            );
            OpError::Parse {
                host: host.to_string(),
                message: e.to_string(),
            }
        })
    }

    pub fn check_response_status_code(
        &self,
        resp: &ResponseStatus,
        host: &str,
    ) -> Result<(), OpError> {
        if resp.status != 0 {
            let err = OpError::Failed(format!(
                "[{}] fail to execute HTTPS request on host {host}, status code in HTTPS response is {}",
                self.name, resp.status
            ));
            tracing::error!("{err}");
            return Err(err);
        }
        Ok(())
    }

    pub fn has_quorum(&self, success: usize, primaries: usize) -> bool {
        if !has_quorum(success, primaries) {
            tracing::error!(
                "[{}] quorum check failed: number of successful primary hosts ({success}) \
                 is not greater than half of the primary nodes ({primaries})",
                self.name
            );
            return false;
        }
        true
    }

    /// Drop hosts that an earlier operation marked unreachable.
    pub fn filter_unreachable_hosts(&mut self, ctx: &ExecContext) {
        if ctx.unreachable_hosts.is_empty() {
            return;
        }
        self.hosts.retain(|h| !ctx.unreachable_hosts.contains(h));
    }

    /// Keep only hosts in the run's target sandbox.
    pub fn filter_hosts_by_sandbox(&mut self, ctx: &ExecContext) {
        if ctx.target_sandbox == MAIN_CLUSTER_SANDBOX || ctx.host_sandbox_map.is_empty() {
            return;
        }
        self.hosts.retain(|h| {
            ctx.host_sandbox_map
                .get(h)
                .is_some_and(|sb| *sb == ctx.target_sandbox)
        });
    }

    // -- spinner -----------------------------------------------------------

    pub fn setup_spinner(&mut self, interactive: bool) {
        self.spinner = interactive.then(|| Spinner::new(&self.description));
    }

    pub fn start_spinner(&self) {
        if let Some(s) = &self.spinner {
            s.start();
        }
    }

    pub fn update_spinner_message(&self, msg: impl Into<String>) {
        if let Some(s) = &self.spinner {
            s.set_message(msg);
        }
    }

    pub fn stop_spinner(&self, msg: impl Into<String>) {
        if let Some(s) = &self.spinner {
            s.finish(msg);
        }
    }

    pub fn stop_fail_spinner(&self, msg: impl Into<String>) {
        if let Some(s) = &self.spinner {
            s.fail(msg);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use vops_core::config::EngineConfig;
    use vops_transport::ScriptedTransport;

    fn ctx() -> ExecContext {
        ExecContext::new(Arc::new(ScriptedTransport::new()), EngineConfig::default())
    }

    #[test]
    fn quorum_is_strict_majority() {
        assert!(has_quorum(2, 3));
        assert!(has_quorum(3, 5));
        assert!(has_quorum(1, 1));
        assert!(!has_quorum(2, 4));
        assert!(!has_quorum(2, 5));
        assert!(!has_quorum(2, 6));
        assert!(!has_quorum(0, 0));
    }

    #[test]
    fn password_auth_requires_username() {
        assert!(OpCredentials::password("", "pw").validate("Op").is_err());
        assert!(OpCredentials::password("dbadmin", "pw").validate("Op").is_ok());
        assert!(OpCredentials::certificate().validate("Op").is_ok());
        assert_eq!(OpCredentials::certificate().to_auth(), Auth::Certificate);
        assert!(!format!("{:?}", OpCredentials::password("u", "secret")).contains("secret"));
    }

    #[test]
    fn filters_unreachable_and_sandbox_hosts() {
        let mut c = ctx();
        let mut base = OpBase::new("Op", "test", vec!["h1".into(), "h2".into(), "h3".into()]);

        base.filter_unreachable_hosts(&c);
        assert_eq!(base.hosts.len(), 3);

        c.unreachable_hosts = vec!["h2".into()];
        base.filter_unreachable_hosts(&c);
        assert_eq!(base.hosts, vec!["h1".to_string(), "h3".to_string()]);

        c.target_sandbox = "sb1".into();
        c.host_sandbox_map.insert("h1".into(), "sb1".into());
        c.host_sandbox_map.insert("h3".into(), String::new());
        base.filter_hosts_by_sandbox(&c);
        assert_eq!(base.hosts, vec!["h1".to_string()]);
    }

    #[test]
    fn host_error_flags_unauthorized() {
        let base = OpBase::new("Op", "test", vec![]);
        let r = HostResult::failure("h1", 401, "nope");
        assert!(matches!(base.host_error("h1", &r), Some(OpError::Unauthorized { .. })));
        let r = HostResult::success("h1", 200, "{}");
        assert!(base.host_error("h1", &r).is_none());
    }

    #[test]
    fn credential_rejection_short_circuits() {
        let mut base = OpBase::new("Op", "test", vec![]);
        base.cluster_request
            .results
            .insert("h1".into(), HostResult::success("h1", 200, "{}"));
        base.cluster_request
            .results
            .insert("h2".into(), HostResult::failure("h2", 503, "starting"));
        assert!(base.check_credentials().is_ok());

        base.cluster_request
            .results
            .insert("h3".into(), HostResult::failure("h3", 401, "Wrong password"));
        assert!(matches!(
            base.check_credentials(),
            Err(OpError::Unauthorized { host }) if host == "h3"
        ));
    }

    #[test]
    fn parse_and_status_checks() {
        let base = OpBase::new("Op", "test", vec![]);
        let ok: ResponseStatus = base.parse_and_check_response("h1", r#"{"status":0}"#).unwrap();
        assert!(base.check_response_status_code(&ok, "h1").is_ok());

        let bad: ResponseStatus = base.parse_and_check_response("h1", r#"{"status":3}"#).unwrap();
        assert!(base.check_response_status_code(&bad, "h1").is_err());

        let err = base.parse_and_check_response::<ResponseStatus>("h1", "not json");
        assert!(matches!(err, Err(OpError::Parse { .. })));
    }
}
