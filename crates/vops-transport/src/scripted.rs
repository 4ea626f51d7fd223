//! In-memory transport that replays canned results. Used for dry runs and
//! for exercising operations without a cluster.

use crate::{BodyHandler, Transport};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use vops_core::request::{HostRequest, API_VERSION};
use vops_core::result::HostResult;

type RouteKey = (String, String);

/// Results are queued per (host, endpoint). Each call pops the next queued
/// result; the last one is repeated once the queue is down to one entry.
/// Unrouted calls behave like a host that refuses connections.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<HashMap<RouteKey, VecDeque<HostResult>>>,
    delays: Mutex<HashMap<String, Duration>>,
    calls: Mutex<Vec<(String, HostRequest)>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a result for `endpoint` (without the version prefix) on `host`.
    pub fn respond(&self, host: &str, endpoint: &str, result: HostResult) -> &Self {
        if let Ok(mut routes) = self.routes.lock() {
            routes
                .entry((host.to_string(), endpoint.to_string()))
                .or_default()
                .push_back(result);
        }
        self
    }

    pub fn respond_json(&self, host: &str, endpoint: &str, body: serde_json::Value) -> &Self {
        self.respond(host, endpoint, HostResult::success(host, 200, body.to_string()))
    }

    /// Delay every answer from `host`.
    pub fn delay(&self, host: &str, by: Duration) -> &Self {
        if let Ok(mut delays) = self.delays.lock() {
            delays.insert(host.to_string(), by);
        }
        self
    }

    /// Every request sent so far, in send order.
    pub fn calls(&self) -> Vec<(String, HostRequest)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self, endpoint: &str) -> usize {
        self.calls()
            .iter()
            .filter(|(_, req)| strip_version(&req.endpoint) == endpoint)
            .count()
    }

    fn next_result(&self, host: &str, endpoint: &str) -> Option<HostResult> {
        let mut routes = self.routes.lock().ok()?;
        let queue = routes.get_mut(&(host.to_string(), endpoint.to_string()))?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

fn strip_version(endpoint: &str) -> &str {
    endpoint.strip_prefix(API_VERSION).unwrap_or(endpoint)
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, host: &str, request: &HostRequest, body: &BodyHandler) -> HostResult {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((host.to_string(), request.clone()));
        }

        let delay = self
            .delays
            .lock()
            .ok()
            .and_then(|d| d.get(host).copied());
        if let Some(by) = delay {
            tokio::time::sleep(by).await;
        }

        let endpoint = strip_version(&request.endpoint);
        let mut result = match self.next_result(host, endpoint) {
            Some(r) => r,
            None => {
                return HostResult::exception(
                    host,
                    format!("dial tcp {host}: connect: connection refused"),
                )
            }
        };
        result.host = host.to_string();

        if let (BodyHandler::Download(path), true) = (body, result.is_passing()) {
            if let Err(e) = tokio::fs::write(path, result.content.as_bytes()).await {
                return HostResult::exception(host, format!("write to {} failed: {e}", path.display()));
            }
            result.content = String::new();
        }
        result
    }
}
