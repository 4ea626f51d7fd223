//! Fetch operations for the data collector tables used by the cascade
//! analyzers. One generic operation, parameterized by a query type that
//! knows its endpoint, its payload shape and where the decoded records go.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::json;
use vops_core::events::{
    LockAttempt, LockRelease, SessionStart, SessionStartList, SlowEvent, SlowEventList, TransactionStart,
    TransactionStartList,
};
use vops_core::request::{HostRequest, HttpMethod};
use vops_engine::{ClusterOp, ErrorJoin, ExecContext, OpBase, OpCredentials, OpError};

/// Lock object the lock-wait queries are restricted to.
pub const LOCK_OBJECT_NAME: &str = "Global Catalog";

pub trait DiagnosticQuery: Send + Sync {
    /// Response body shape.
    type Response: DeserializeOwned;

    const NAME: &'static str;
    const DESCRIPTION: &'static str;
    /// Lock queries only need one host.
    const SINGLE_HOST: bool;

    fn request(&self) -> Result<HostRequest, OpError>;

    /// Move the decoded records into the context.
    fn store(response: Self::Response, ctx: &mut ExecContext);
}

/// Send one diagnostic query and keep the first passing host's records.
pub struct DiagnosticFetchOp<Q: DiagnosticQuery> {
    base: OpBase,
    credentials: OpCredentials,
    query: Q,
}

impl<Q: DiagnosticQuery> DiagnosticFetchOp<Q> {
    pub fn new(up_hosts: &[String], credentials: OpCredentials, query: Q) -> Result<Self, OpError> {
        let hosts = if Q::SINGLE_HOST {
            up_hosts.iter().take(1).cloned().collect()
        } else {
            up_hosts.to_vec()
        };
        let base = OpBase::new(Q::NAME, Q::DESCRIPTION, hosts);
        credentials.validate(&base.name)?;
        Ok(Self {
            base,
            credentials,
            query,
        })
    }

    pub fn query(&self) -> &Q {
        &self.query
    }
}

#[async_trait]
impl<Q: DiagnosticQuery> ClusterOp for DiagnosticFetchOp<Q> {
    fn base(&self) -> &OpBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OpBase {
        &mut self.base
    }

    async fn prepare(&mut self, ctx: &mut ExecContext) -> Result<(), OpError> {
        if self.base.hosts.is_empty() {
            return Err(OpError::Config(format!(
                "[{}] no up host to query",
                self.base.name
            )));
        }
        ctx.dispatcher.setup(&self.base.hosts);
        // Diagnostic queries run quietly under the caller's progress output.
        self.base.spinner = None;
        let request = self.query.request()?.with_auth(self.credentials.to_auth());
        for host in &self.base.hosts {
            self.base.cluster_request.insert(host, request.clone());
        }
        Ok(())
    }

    async fn process_result(&mut self, ctx: &mut ExecContext) -> Result<(), OpError> {
        self.base.check_credentials()?;
        let mut errors = ErrorJoin::new();
        for (host, result) in &self.base.cluster_request.results {
            self.base.log_response(host, result);
            if result.is_passing() {
                let response: Q::Response = self.base.parse_and_check_response(host, &result.content)?;
                Q::store(response, ctx);
                return Ok(());
            }
            if let Some(err) = self.base.host_error(host, result) {
                errors.push(err);
            }
        }
        errors.into_result()
    }
}

// ---------------------------------------------------------------------------
// Lock attempts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct LockAttemptsQuery {
    pub username: String,
    pub start_time: String,
    pub end_time: String,
    pub node_name: Option<String>,
    /// Minimum wait duration, `HH:MM:SS`.
    pub min_duration: String,
    pub limit: usize,
}

impl DiagnosticQuery for LockAttemptsQuery {
    type Response = Vec<LockAttempt>;

    const NAME: &'static str = "NMALockAttemptsOp";
    const DESCRIPTION: &'static str = "Check lock waiting events";
    const SINGLE_HOST: bool = true;

    fn request(&self) -> Result<HostRequest, OpError> {
        let mut params = json!({
            "start-time": self.start_time,
            "end-time": self.end_time,
            "object-name": LOCK_OBJECT_NAME,
            "mode": "X",
            "duration": self.min_duration,
            "limit": self.limit,
        });
        if let Some(node) = &self.node_name {
            params["node-name"] = json!(node);
        }
        let body = json!({ "username": self.username, "params": params });
        Ok(HostRequest::nma(HttpMethod::Post, "dc/lock-attempts").with_json_body(&body)?)
    }

    fn store(response: Self::Response, ctx: &mut ExecContext) {
        ctx.lock_attempts = Some(response);
    }
}

pub type NmaLockAttemptsOp = DiagnosticFetchOp<LockAttemptsQuery>;

// ---------------------------------------------------------------------------
// Lock releases
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct LockReleasesQuery {
    pub username: String,
    pub db_name: String,
    /// Database password; omitted for trust or certificate auth.
    pub password: Option<String>,
    pub start_time: String,
    pub end_time: String,
    pub node_name: Option<String>,
    /// Minimum hold duration, `HH:MM:SS`.
    pub min_duration: String,
    pub limit: usize,
}

impl std::fmt::Debug for LockReleasesQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockReleasesQuery")
            .field("username", &self.username)
            .field("db_name", &self.db_name)
            .field("start_time", &self.start_time)
            .field("end_time", &self.end_time)
            .field("node_name", &self.node_name)
            .finish_non_exhaustive()
    }
}

impl DiagnosticQuery for LockReleasesQuery {
    type Response = Vec<LockRelease>;

    const NAME: &'static str = "NMALockReleasesOp";
    const DESCRIPTION: &'static str = "Check lock holding events";
    const SINGLE_HOST: bool = true;

    fn request(&self) -> Result<HostRequest, OpError> {
        let mut params = json!({
            "start-time": self.start_time,
            "end-time": self.end_time,
            "object-name": LOCK_OBJECT_NAME,
            "mode": "X",
            "duration": self.min_duration,
            "limit": self.limit,
            "orderby": "duration DESC",
        });
        if let Some(node) = &self.node_name {
            params["node-name"] = json!(node);
        }
        let mut body = json!({
            "username": self.username,
            "dbname": self.db_name,
            "params": params,
        });
        if let Some(pw) = &self.password {
            body["password"] = json!(pw);
        }
        Ok(HostRequest::nma(HttpMethod::Post, "dc/lock-releases").with_json_body(&body)?)
    }

    fn store(response: Self::Response, ctx: &mut ExecContext) {
        ctx.lock_releases = Some(response);
    }
}

pub type NmaLockReleasesOp = DiagnosticFetchOp<LockReleasesQuery>;

// ---------------------------------------------------------------------------
// Slow events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct SlowEventsQuery {
    pub start_time: String,
    pub end_time: String,
    pub node_name: Option<String>,
    /// Decimal thread id.
    pub thread_id: Option<String>,
    pub event_description: Option<String>,
    pub debug: bool,
}

impl DiagnosticQuery for SlowEventsQuery {
    type Response = SlowEventList;

    const NAME: &'static str = "HTTPSSlowEventsOp";
    const DESCRIPTION: &'static str = "Call /v1/dc/slow-events";
    const SINGLE_HOST: bool = false;

    fn request(&self) -> Result<HostRequest, OpError> {
        let mut req = HostRequest::https(HttpMethod::Get, "dc/slow-events");
        if !self.start_time.is_empty() {
            req = req.with_query("start-time", self.start_time.as_str());
        }
        if !self.end_time.is_empty() {
            req = req.with_query("end-time", self.end_time.as_str());
        }
        if self.debug {
            req = req.with_query("debug", "true");
        }
        if let Some(node) = &self.node_name {
            req = req.with_query("node-name", node.as_str());
        }
        if let Some(thread) = &self.thread_id {
            req = req.with_query("thread-id", thread.as_str());
        }
        if let Some(desc) = &self.event_description {
            req = req.with_query("event-desc", desc.as_str());
        }
        Ok(req)
    }

    fn store(response: Self::Response, ctx: &mut ExecContext) {
        ctx.slow_events = Some(response.events);
    }
}

pub type HttpsSlowEventsOp = DiagnosticFetchOp<SlowEventsQuery>;

// ---------------------------------------------------------------------------
// Session and transaction starts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct SessionStartsQuery {
    /// Comma-separated session ids.
    pub session_id: String,
    pub start_time: String,
    pub end_time: String,
}

impl DiagnosticQuery for SessionStartsQuery {
    type Response = SessionStartList;

    const NAME: &'static str = "HTTPSSessionStartsOp";
    const DESCRIPTION: &'static str = "Call /v1/dc/session-starts";
    const SINGLE_HOST: bool = false;

    fn request(&self) -> Result<HostRequest, OpError> {
        Ok(time_window(
            HostRequest::https(HttpMethod::Get, "dc/session-starts"),
            "session-id",
            &self.session_id,
            &self.start_time,
            &self.end_time,
        ))
    }

    fn store(response: Self::Response, ctx: &mut ExecContext) {
        ctx.session_starts = Some(response.sessions);
    }
}

pub type HttpsSessionStartsOp = DiagnosticFetchOp<SessionStartsQuery>;

#[derive(Debug, Clone, Default)]
pub struct TransactionStartsQuery {
    /// Comma-separated transaction ids.
    pub txn_id: String,
    pub start_time: String,
    pub end_time: String,
}

impl DiagnosticQuery for TransactionStartsQuery {
    type Response = TransactionStartList;

    const NAME: &'static str = "HTTPSTransactionStartsOp";
    const DESCRIPTION: &'static str = "Call /v1/dc/transaction-starts";
    const SINGLE_HOST: bool = false;

    fn request(&self) -> Result<HostRequest, OpError> {
        Ok(time_window(
            HostRequest::https(HttpMethod::Get, "dc/transaction-starts"),
            "txn-id",
            &self.txn_id,
            &self.start_time,
            &self.end_time,
        ))
    }

    fn store(response: Self::Response, ctx: &mut ExecContext) {
        ctx.transaction_starts = Some(response.transactions);
    }
}

pub type HttpsTransactionStartsOp = DiagnosticFetchOp<TransactionStartsQuery>;

fn time_window(mut req: HostRequest, id_key: &str, ids: &str, start: &str, end: &str) -> HostRequest {
    for (key, value) in [(id_key, ids), ("start-time", start), ("end-time", end)] {
        if !value.is_empty() {
            req = req.with_query(key, value);
        }
    }
    req
}

/// Convenience accessors for callers that only need the decoded lists.
pub fn take_lock_attempts(ctx: &mut ExecContext) -> Vec<LockAttempt> {
    ctx.lock_attempts.take().unwrap_or_default()
}

pub fn take_lock_releases(ctx: &mut ExecContext) -> Vec<LockRelease> {
    ctx.lock_releases.take().unwrap_or_default()
}

pub fn take_slow_events(ctx: &mut ExecContext) -> Vec<SlowEvent> {
    ctx.slow_events.take().unwrap_or_default()
}

pub fn take_session_starts(ctx: &mut ExecContext) -> Vec<SessionStart> {
    ctx.session_starts.take().unwrap_or_default()
}

pub fn take_transaction_starts(ctx: &mut ExecContext) -> Vec<TransactionStart> {
    ctx.transaction_starts.take().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use vops_core::config::EngineConfig;
    use vops_core::request::Auth;
    use vops_core::result::HostResult;
    use vops_engine::ClusterOpEngine;
    use vops_transport::ScriptedTransport;

    fn hosts() -> Vec<String> {
        vec!["h1".into(), "h2".into()]
    }

    #[tokio::test]
    async fn lock_attempts_go_to_one_host_only() {
        let t = Arc::new(ScriptedTransport::new());
        t.respond_json(
            "h1",
            "dc/lock-attempts",
            json!([{"node_name": "n1", "start_time": "2024-01-01 10:00:00", "duration": "00:00:31",
                    "transaction_id": 12, "session_id": "s1"}]),
        );
        let query = LockAttemptsQuery {
            username: "dbadmin".into(),
            start_time: "2024-01-01 09:15:00".into(),
            end_time: "2024-01-01 10:30:00".into(),
            node_name: None,
            min_duration: "00:00:30".into(),
            limit: 40960,
        };
        let op = NmaLockAttemptsOp::new(&hosts(), OpCredentials::password("dbadmin", "pw"), query).unwrap();
        let mut engine = ClusterOpEngine::new(t.clone(), EngineConfig::default());
        engine.push(op);
        engine.run().await.unwrap();

        let attempts = take_lock_attempts(engine.context_mut());
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].transaction_id, "12");

        let calls = t.calls();
        assert_eq!(calls.len(), 1);
        let req = &calls[0].1;
        // The agent never receives HTTPS basic-auth credentials.
        assert_eq!(req.auth, Auth::None);
        let body: serde_json::Value = serde_json::from_str(req.body.as_deref().unwrap()).unwrap();
        assert_eq!(body["params"]["object-name"], "Global Catalog");
        assert_eq!(body["params"]["mode"], "X");
        assert!(body["params"].get("node-name").is_none());
    }

    #[test]
    fn lock_release_body_carries_db_credentials() {
        let query = LockReleasesQuery {
            username: "dbadmin".into(),
            db_name: "db".into(),
            password: Some("secret".into()),
            node_name: Some("v_db_node0001".into()),
            limit: 10,
            ..Default::default()
        };
        let req = query.request().unwrap();
        let body: serde_json::Value = serde_json::from_str(req.body.as_deref().unwrap()).unwrap();
        assert_eq!(body["dbname"], "db");
        assert_eq!(body["password"], "secret");
        assert_eq!(body["params"]["orderby"], "duration DESC");
        assert_eq!(body["params"]["node-name"], "v_db_node0001");
        assert!(!format!("{query:?}").contains("secret"));
    }

    #[tokio::test]
    async fn slow_events_take_first_passing_host() {
        let t = Arc::new(ScriptedTransport::new());
        t.respond("h1", "dc/slow-events", HostResult::failure("h1", 500, "oops"))
            .respond_json(
                "h2",
                "dc/slow-events",
                json!({"dc_slow_event_list": [{"timestamp": "2024-01-01 10:00:00", "duration_us": 5}]}),
            );
        let query = SlowEventsQuery {
            start_time: "2024-01-01 09:55:00".into(),
            end_time: "2024-01-01 10:05:00".into(),
            thread_id: Some("26".into()),
            ..Default::default()
        };
        let op = HttpsSlowEventsOp::new(&hosts(), OpCredentials::certificate(), query).unwrap();
        let mut engine = ClusterOpEngine::new(t.clone(), EngineConfig::default());
        engine.push(op);
        engine.run().await.unwrap();

        let events = take_slow_events(engine.context_mut());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].duration_us, 5);
        let calls = t.calls();
        assert!(calls
            .iter()
            .all(|(_, r)| r.query_params.get("thread-id").map(String::as_str) == Some("26")));
    }

    #[tokio::test]
    async fn rejected_credentials_stop_the_fetch() {
        let t = Arc::new(ScriptedTransport::new());
        t.respond("h1", "dc/slow-events", HostResult::failure("h1", 401, "Wrong certificate"))
            .respond_json("h2", "dc/slow-events", json!({"dc_slow_event_list": []}));
        let op = HttpsSlowEventsOp::new(&hosts(), OpCredentials::certificate(), SlowEventsQuery::default()).unwrap();
        let mut engine = ClusterOpEngine::new(t, EngineConfig::default());
        engine.push(op);
        let err = engine.run().await.unwrap_err();
        assert!(matches!(err.op_error(), Some(OpError::Unauthorized { host }) if host == "h1"));
    }

    #[tokio::test]
    async fn all_hosts_failing_joins_errors() {
        let t = Arc::new(ScriptedTransport::new());
        let query = SessionStartsQuery {
            session_id: "s1,s2".into(),
            ..Default::default()
        };
        let op = HttpsSessionStartsOp::new(&hosts(), OpCredentials::certificate(), query).unwrap();
        let mut engine = ClusterOpEngine::new(t, EngineConfig::default());
        engine.push(op);
        let err = engine.run().await.unwrap_err();
        match err.op_error() {
            Some(OpError::Multiple(errs)) => assert_eq!(errs.len(), 2),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(engine.context().session_starts.is_none());
    }

    #[tokio::test]
    async fn transaction_starts_are_stored() {
        let t = Arc::new(ScriptedTransport::new());
        t.respond_json(
            "h1",
            "dc/transaction-starts",
            json!({"dc_transaction_starts_list": [{"txn_id": 45035996273705001u64, "isolation": "SERIALIZABLE"}]}),
        );
        let query = TransactionStartsQuery {
            txn_id: "45035996273705001".into(),
            ..Default::default()
        };
        let op = HttpsTransactionStartsOp::new(&hosts()[..1], OpCredentials::certificate(), query).unwrap();
        let mut engine = ClusterOpEngine::new(t, EngineConfig::default());
        engine.push(op);
        engine.run().await.unwrap();
        let txns = take_transaction_starts(engine.context_mut());
        assert_eq!(txns[0].txn_id, "45035996273705001");
    }

    #[tokio::test]
    async fn no_hosts_is_rejected_at_prepare() {
        let op = HttpsSlowEventsOp::new(&[], OpCredentials::certificate(), SlowEventsQuery::default()).unwrap();
        let mut engine = ClusterOpEngine::new(Arc::new(ScriptedTransport::new()), EngineConfig::default());
        engine.push(op);
        let err = engine.run().await.unwrap_err();
        assert!(matches!(err.op_error(), Some(OpError::Config(_))));
    }
}
