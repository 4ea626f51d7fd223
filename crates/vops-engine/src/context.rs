//! State shared by every operation in one engine run.
//!
//! Operations run strictly one after another, so the context is handed to
//! each phase as `&mut` and never touched by the per-host request tasks.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;
use vops_core::config::EngineConfig;
use vops_core::events::{LockAttempt, LockRelease, SessionStart, SlowEvent, TransactionStart};
use vops_core::node::{NodeStateInfo, MAIN_CLUSTER_SANDBOX};
use vops_transport::{RequestDispatcher, Transport};

pub struct ExecContext {
    pub run_id: Uuid,
    pub config: EngineConfig,
    /// Owns this run's connection pool.
    pub dispatcher: RequestDispatcher,

    // -- topology ----------------------------------------------------------
    /// Up hosts, sorted so the first one is a stable initiator.
    pub up_hosts: Vec<String>,
    pub compute_hosts: Vec<String>,
    /// Up host -> subcluster name.
    pub up_sc_info: BTreeMap<String, String>,
    /// Up host -> sandbox name ("" for the main cluster).
    pub sandbox_info: BTreeMap<String, String>,
    /// Every known host -> sandbox name, used to restrict operations to
    /// `target_sandbox`.
    pub host_sandbox_map: BTreeMap<String, String>,
    /// Node records by host address.
    pub nodes_info: BTreeMap<String, NodeStateInfo>,
    /// Sandbox this run is scoped to; the main cluster means no restriction.
    pub target_sandbox: String,

    // -- host annotations --------------------------------------------------
    /// Hosts later operations must skip.
    pub unreachable_hosts: Vec<String>,
    /// Hosts that rejected our credentials.
    pub auth_failed_hosts: BTreeSet<String>,

    // -- decoded diagnostic payloads ---------------------------------------
    pub lock_attempts: Option<Vec<LockAttempt>>,
    pub lock_releases: Option<Vec<LockRelease>>,
    pub slow_events: Option<Vec<SlowEvent>>,
    pub session_starts: Option<Vec<SessionStart>>,
    pub transaction_starts: Option<Vec<TransactionStart>>,

    /// Files written by download operations, by host.
    pub downloaded_files: BTreeMap<String, PathBuf>,
}

impl ExecContext {
    pub fn new(transport: Arc<dyn Transport>, config: EngineConfig) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            dispatcher: RequestDispatcher::new(transport, &config),
            config,
            up_hosts: Vec::new(),
            compute_hosts: Vec::new(),
            up_sc_info: BTreeMap::new(),
            sandbox_info: BTreeMap::new(),
            host_sandbox_map: BTreeMap::new(),
            nodes_info: BTreeMap::new(),
            target_sandbox: MAIN_CLUSTER_SANDBOX.to_string(),
            unreachable_hosts: Vec::new(),
            auth_failed_hosts: BTreeSet::new(),
            lock_attempts: None,
            lock_releases: None,
            slow_events: None,
            session_starts: None,
            transaction_starts: None,
            downloaded_files: BTreeMap::new(),
        }
    }

    /// First up host, the usual initiator for single-host requests.
    pub fn initiator(&self) -> Option<&str> {
        self.up_hosts.first().map(String::as_str)
    }

    /// Primary up hosts, based on the node records collected so far.
    pub fn primary_up_hosts(&self) -> Vec<String> {
        self.up_hosts
            .iter()
            .filter(|h| self.nodes_info.get(*h).is_some_and(|n| n.is_primary))
            .cloned()
            .collect()
    }

    pub fn mark_unreachable(&mut self, host: &str) {
        if !self.unreachable_hosts.iter().any(|h| h == host) {
            self.unreachable_hosts.push(host.to_string());
        }
    }
}

impl std::fmt::Debug for ExecContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecContext")
            .field("run_id", &self.run_id)
            .field("up_hosts", &self.up_hosts)
            .field("compute_hosts", &self.compute_hosts)
            .field("target_sandbox", &self.target_sandbox)
            .field("unreachable_hosts", &self.unreachable_hosts)
            .field("auth_failed_hosts", &self.auth_failed_hosts)
            .finish_non_exhaustive()
    }
}
