//! Request dispatcher: fan a request set out to every host concurrently and
//! wait for exactly one result per host.

use crate::pool::ConnectionPool;
use crate::progress::{ElapsedReporter, Spinner};
use crate::timeout::with_timeout;
use crate::{Transport, TransportError};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use vops_core::config::EngineConfig;
use vops_core::request::ClusterRequest;
use vops_core::result::HostResult;

pub struct RequestDispatcher {
    pool: ConnectionPool,
    default_timeout_secs: u64,
    interactive: bool,
    progress_interval: Duration,
}

impl RequestDispatcher {
    pub fn new(transport: Arc<dyn Transport>, config: &EngineConfig) -> Self {
        Self {
            pool: ConnectionPool::new(transport),
            default_timeout_secs: config.request_timeout_secs,
            interactive: config.interactive,
            progress_interval: config.progress_interval(),
        }
    }

    /// Bind one buffered handle per host.
    pub fn setup(&mut self, hosts: &[String]) {
        self.pool.setup(hosts);
    }

    /// Bind one download handle per host; bodies are streamed to the paths.
    pub fn setup_download(&mut self, destinations: &BTreeMap<String, PathBuf>) {
        self.pool.setup_download(destinations);
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Send every request in `cluster_request` concurrently and store one
    /// result per requested host in `cluster_request.results`.
    ///
    /// Fails before sending anything if a requested host has no handle.
    pub async fn send_request(
        &self,
        cluster_request: &mut ClusterRequest,
        spinner: Option<&Spinner>,
    ) -> Result<(), TransportError> {
        for host in cluster_request.requests.keys() {
            if self.pool.get(host).is_none() {
                return Err(TransportError::MissingHost(host.clone()));
            }
        }

        cluster_request.results.clear();
        let host_count = cluster_request.requests.len();
        if host_count == 0 {
            return Ok(());
        }

        let _reporter = self.interactive.then(|| {
            ElapsedReporter::spawn(
                cluster_request.name.clone(),
                host_count,
                self.progress_interval,
                spinner.cloned(),
            )
        });

        let (tx, mut rx) = mpsc::channel::<(String, HostResult)>(host_count);
        for (host, request) in &cluster_request.requests {
            let transport = self.pool.transport();
            let body = self
                .pool
                .get(host)
                .map(|c| c.body.clone())
                .unwrap_or_default();
            let mut request = request.clone();
            let timeout_secs = *request.timeout_secs.get_or_insert(self.default_timeout_secs);
            let host = host.clone();
            let tx = tx.clone();

            tokio::spawn(async move {
                let result =
                    with_timeout(&host, timeout_secs, transport.send(&host, &request, &body)).await;
                if tx.send((host.clone(), result)).await.is_err() {
                    tracing::warn!("[Dispatcher] result for host {host} arrived after the receiver closed");
                }
            });
        }
        drop(tx);

        // The channel closes once every task has sent or died.
        while let Some((host, result)) = rx.recv().await {
            cluster_request.results.insert(host, result);
            if cluster_request.results.len() == host_count {
                break;
            }
        }

        for host in cluster_request.requests.keys() {
            if !cluster_request.results.contains_key(host) {
                tracing::error!("[Dispatcher] no result collected from host {host}");
                cluster_request.results.insert(
                    host.clone(),
                    HostResult::exception(host, "request task ended without a result"),
                );
            }
        }

        tracing::debug!(
            "[Dispatcher] {}: collected {} result(s)",
            cluster_request.name,
            cluster_request.results.len()
        );
        Ok(())
    }
}
