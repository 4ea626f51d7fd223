//! Connection pool with one handle per target host, owned by a single run.

use crate::{BodyHandler, Transport};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Per-host handle: the host plus how its response bodies are consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConnection {
    pub host: String,
    pub body: BodyHandler,
}

/// Holds the transport and the set of hosts it may currently talk to.
/// Each engine run owns its own pool.
pub struct ConnectionPool {
    transport: Arc<dyn Transport>,
    connections: BTreeMap<String, HostConnection>,
}

impl ConnectionPool {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            connections: BTreeMap::new(),
        }
    }

    /// Replace the handle set with buffered handles for `hosts`.
    pub fn setup(&mut self, hosts: &[String]) {
        self.connections = hosts
            .iter()
            .map(|h| {
                (
                    h.clone(),
                    HostConnection {
                        host: h.clone(),
                        body: BodyHandler::Buffer,
                    },
                )
            })
            .collect();
    }

    /// Replace the handle set with download handles, one destination per host.
    pub fn setup_download(&mut self, destinations: &BTreeMap<String, std::path::PathBuf>) {
        self.connections = destinations
            .iter()
            .map(|(h, path)| {
                (
                    h.clone(),
                    HostConnection {
                        host: h.clone(),
                        body: BodyHandler::Download(path.clone()),
                    },
                )
            })
            .collect();
    }

    pub fn get(&self, host: &str) -> Option<&HostConnection> {
        self.connections.get(host)
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.transport)
    }

    pub fn hosts(&self) -> Vec<String> {
        self.connections.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
