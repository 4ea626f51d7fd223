//! Cluster health entry point: fetch diagnostic records through the
//! operation engine and run the cascade analyzers over them.

use crate::lock_cascade::{build_lock_cascade, NodeLockEvents};
use crate::session_info::{IdSet, SessionTxnInfo};
use crate::slow_cascade::{build_slow_cascade, SlowCascade};
use crate::{AnalysisError, TimeWindow};
use std::sync::Arc;
use vops_core::config::VopsConfig;
use vops_core::events::{SessionStart, SlowEvent, TransactionStart};
use vops_engine::{ClusterOpEngine, ExecContext};
use vops_ops::diagnostics::{
    take_lock_attempts, take_lock_releases, take_session_starts, take_slow_events, take_transaction_starts,
};
use vops_ops::{
    fetch_up_nodes, DatabaseOptions, DiagnosticFetchOp, DiagnosticQuery, LockAttemptsQuery, LockReleasesQuery,
    SessionStartsQuery, SlowEventsQuery, TransactionStartsQuery,
};
use vops_transport::Transport;

pub struct ClusterHealth {
    transport: Arc<dyn Transport>,
    config: VopsConfig,
    database: DatabaseOptions,
    hosts: Option<Vec<String>>,
}

impl ClusterHealth {
    pub fn new(transport: Arc<dyn Transport>, config: VopsConfig, database: DatabaseOptions) -> Self {
        Self {
            transport,
            config,
            database,
            hosts: None,
        }
    }

    /// Query these hosts instead of discovering the primary up nodes.
    pub fn with_hosts(mut self, hosts: Vec<String>) -> Self {
        self.hosts = Some(hosts);
        self
    }

    pub fn config(&self) -> &VopsConfig {
        &self.config
    }

    /// Primary up hosts, discovered once. Falls back to every up host when
    /// no primary is up.
    pub async fn hosts(&mut self) -> Result<Vec<String>, AnalysisError> {
        if let Some(hosts) = &self.hosts {
            return Ok(hosts.clone());
        }
        let topology = fetch_up_nodes(self.transport.clone(), self.config.engine.clone(), &self.database).await?;
        let hosts = if topology.primary_up_hosts.is_empty() {
            topology.up_hosts
        } else {
            topology.primary_up_hosts
        };
        self.hosts = Some(hosts.clone());
        Ok(hosts)
    }

    async fn fetch<Q: DiagnosticQuery + 'static>(&mut self, query: Q) -> Result<ExecContext, AnalysisError> {
        let hosts = self.hosts().await?;
        let op = DiagnosticFetchOp::new(&hosts, self.database.credentials.clone(), query)?;
        let mut engine = ClusterOpEngine::new(self.transport.clone(), self.config.engine.clone());
        engine.push(op);
        engine.run().await?;
        Ok(engine.into_context())
    }

    pub async fn slow_events(&mut self, query: SlowEventsQuery) -> Result<Vec<SlowEvent>, AnalysisError> {
        let mut ctx = self.fetch(query).await?;
        Ok(take_slow_events(&mut ctx))
    }

    /// Session starts for comma-separated `session_ids`, optionally limited
    /// to `window`.
    pub async fn session_starts(
        &mut self,
        session_ids: &str,
        window: Option<&TimeWindow>,
    ) -> Result<Vec<SessionStart>, AnalysisError> {
        let (start_time, end_time) = window_strings(window);
        let mut ctx = self
            .fetch(SessionStartsQuery {
                session_id: session_ids.to_string(),
                start_time,
                end_time,
            })
            .await?;
        Ok(take_session_starts(&mut ctx))
    }

    pub async fn transaction_starts(
        &mut self,
        txn_ids: &str,
        window: Option<&TimeWindow>,
    ) -> Result<Vec<TransactionStart>, AnalysisError> {
        let (start_time, end_time) = window_strings(window);
        let mut ctx = self
            .fetch(TransactionStartsQuery {
                txn_id: txn_ids.to_string(),
                start_time,
                end_time,
            })
            .await?;
        Ok(take_transaction_starts(&mut ctx))
    }

    /// Start records for `ids`. Id kinds with nothing to look up are not
    /// queried.
    pub async fn session_txn_info(&mut self, ids: &IdSet) -> Result<SessionTxnInfo, AnalysisError> {
        if !self.config.analysis.fetch_session_txn_info {
            tracing::info!("skipping session and transaction info retrieval");
            return Ok(SessionTxnInfo::default());
        }
        if ids.is_empty() {
            tracing::info!("no session or transaction ids found, skipping retrieval");
            return Ok(SessionTxnInfo::default());
        }
        let sessions = if ids.sessions.is_empty() {
            Vec::new()
        } else {
            self.session_starts(&ids.session_list(), None).await?
        };
        let transactions = if ids.transactions.is_empty() {
            Vec::new()
        } else {
            self.transaction_starts(&ids.transaction_list(), None).await?
        };
        tracing::info!(
            "resolved {} of {} session(s) and {} of {} transaction(s)",
            sessions.len(),
            ids.sessions.len(),
            transactions.len(),
            ids.transactions.len()
        );
        Ok(SessionTxnInfo::new(sessions, transactions))
    }

    /// Lock-wait cascade per node for `window`. Session and transaction
    /// lookups that fail are logged and leave the cascade unenriched.
    pub async fn lock_cascade(&mut self, window: &TimeWindow) -> Result<Vec<NodeLockEvents>, AnalysisError> {
        let analysis = self.config.analysis.clone();
        let search = window.with_lookback(analysis.lock_lookback())?;
        let username = self.database.credentials.username.clone();

        let mut ctx = self
            .fetch(LockAttemptsQuery {
                username: username.clone(),
                start_time: search.start_str(),
                end_time: search.end_str(),
                node_name: None,
                min_duration: analysis.lock_attempt_threshold.clone(),
                limit: analysis.lock_attempts_limit,
            })
            .await?;
        let attempts = take_lock_attempts(&mut ctx);

        let mut ctx = self
            .fetch(LockReleasesQuery {
                username,
                db_name: self.database.db_name.clone(),
                password: self.database.credentials.password.clone(),
                start_time: search.start_str(),
                end_time: search.end_str(),
                node_name: None,
                min_duration: analysis.lock_release_threshold.clone(),
                limit: analysis.lock_releases_limit,
            })
            .await?;
        let releases = take_lock_releases(&mut ctx);
        tracing::info!(
            "loaded {} lock wait and {} lock hold event(s) since {}",
            attempts.len(),
            releases.len(),
            search.start_str()
        );

        let mut cascade = build_lock_cascade(&attempts, &releases, window, &analysis)?;

        let mut ids = IdSet::default();
        for node in &cascade {
            node.collect_ids(&mut ids, &analysis.internal_session_id);
        }
        match self.session_txn_info(&ids).await {
            Ok(info) => cascade.iter_mut().for_each(|n| n.attach(&info)),
            Err(e) => tracing::error!("failed to get session and transaction info for lock events: {e}"),
        }
        Ok(cascade)
    }

    /// Causality tree rooted at the slowest event of `window`.
    pub async fn slow_event_cascade(&mut self, window: &TimeWindow) -> Result<SlowCascade, AnalysisError> {
        let analysis = self.config.analysis.clone();
        let search = window.with_lookback(analysis.slow_event_lookback())?;
        let events = self
            .slow_events(SlowEventsQuery {
                start_time: search.start_str(),
                end_time: search.end_str(),
                ..Default::default()
            })
            .await?;
        if events.is_empty() {
            tracing::info!("no slow events found in the time range");
            return Ok(SlowCascade::default());
        }

        let mut cascade = build_slow_cascade(&events, window, &analysis)?;
        if cascade.is_empty() {
            return Ok(cascade);
        }
        let info = self.session_txn_info(&cascade.ids).await?;
        cascade.attach(&info);
        Ok(cascade)
    }
}

fn window_strings(window: Option<&TimeWindow>) -> (String, String) {
    window
        .map(|w| (w.start_str(), w.end_str()))
        .unwrap_or_default()
}
