//! Commands assembled from operations: each builds an instruction list, runs
//! it on a fresh engine and returns what the caller needs.

use crate::{HttpsGetUpNodesOp, HttpsPollNodeStateOp, HttpsStopDbOp};
use std::collections::BTreeMap;
use std::sync::Arc;
use vops_core::config::EngineConfig;
use vops_engine::{ClusterOpEngine, EngineError, EngineRunRecord, OpCredentials, OpError};
use vops_transport::Transport;

/// Connection options shared by every command.
#[derive(Debug, Clone, Default)]
pub struct DatabaseOptions {
    pub db_name: String,
    pub hosts: Vec<String>,
    pub credentials: OpCredentials,
    /// Restrict the command to this sandbox; empty means the main cluster.
    pub sandbox: String,
    pub main_cluster_only: bool,
    pub is_eon: bool,
}

impl DatabaseOptions {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.db_name.trim().is_empty() {
            return Err(EngineError::Config("must specify a database name".into()));
        }
        if self.hosts.is_empty() {
            return Err(EngineError::Config("must specify a host or host list".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct StopDbOptions {
    pub database: DatabaseOptions,
    /// Seconds to let sessions drain before shutdown. `None` or zero stops
    /// without draining.
    pub drain_seconds: Option<u64>,
    /// Seconds to wait for the nodes to go down; zero uses the default.
    pub polling_timeout_secs: u64,
}

/// Up-node discovery result.
#[derive(Debug, Clone, Default)]
pub struct ClusterTopology {
    pub up_hosts: Vec<String>,
    pub compute_hosts: Vec<String>,
    pub up_sc_info: BTreeMap<String, String>,
    pub sandbox_info: BTreeMap<String, String>,
    pub primary_up_hosts: Vec<String>,
}

/// Find the up nodes and shut the database down through them, then wait
/// for every host to stop answering.
pub async fn stop_database(
    transport: Arc<dyn Transport>,
    config: EngineConfig,
    options: &StopDbOptions,
) -> Result<EngineRunRecord, EngineError> {
    let db = &options.database;
    db.validate()?;
    let wrap = |e: OpError| EngineError::Config(e.to_string());

    let get_up_nodes = HttpsGetUpNodesOp::new(&db.db_name, db.hosts.clone(), db.credentials.clone())
        .map_err(wrap)?
        .full_scan()
        .validate_hosts();
    let stop_db = HttpsStopDbOp::new(
        db.credentials.clone(),
        &db.sandbox,
        db.main_cluster_only,
        db.is_eon,
        options.drain_seconds,
    )
    .map_err(wrap)?;
    let poll_down = HttpsPollNodeStateOp::new(
        db.hosts.clone(),
        db.credentials.clone(),
        options.polling_timeout_secs,
    )
    .map_err(wrap)?
    .down();

    let mut engine = ClusterOpEngine::new(transport, config);
    engine.context_mut().target_sandbox = db.sandbox.clone();
    engine.push(get_up_nodes).push(stop_db).push(poll_down);

    let record = engine.run().await?;
    tracing::info!("[StopDB] database {} stopped", db.db_name);
    Ok(record)
}

/// Block until every host reports its node UP.
pub async fn wait_for_nodes_up(
    transport: Arc<dyn Transport>,
    config: EngineConfig,
    options: &DatabaseOptions,
    timeout_secs: u64,
) -> Result<EngineRunRecord, EngineError> {
    options.validate()?;
    let poll = HttpsPollNodeStateOp::new(options.hosts.clone(), options.credentials.clone(), timeout_secs)
        .map_err(|e| EngineError::Config(e.to_string()))?;
    let mut engine = ClusterOpEngine::new(transport, config);
    engine.push(poll);
    engine.run().await
}

/// Discover the up nodes and the subcluster and sandbox layout.
pub async fn fetch_up_nodes(
    transport: Arc<dyn Transport>,
    config: EngineConfig,
    options: &DatabaseOptions,
) -> Result<ClusterTopology, EngineError> {
    options.validate()?;
    let op = HttpsGetUpNodesOp::new(&options.db_name, options.hosts.clone(), options.credentials.clone())
        .map_err(|e| EngineError::Config(e.to_string()))?
        .full_scan();
    let mut engine = ClusterOpEngine::new(transport, config);
    engine.push(op);
    engine.run().await?;

    let ctx = engine.into_context();
    Ok(ClusterTopology {
        primary_up_hosts: ctx.primary_up_hosts(),
        up_hosts: ctx.up_hosts,
        compute_hosts: ctx.compute_hosts,
        up_sc_info: ctx.up_sc_info,
        sandbox_info: ctx.sandbox_info,
    })
}
