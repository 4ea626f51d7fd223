//! vops-transport: Send per-host requests concurrently and collect one
//! result per host.

pub mod dispatcher;
pub mod http;
pub mod pool;
pub mod progress;
pub mod scripted;
pub mod timeout;

use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;
use vops_core::request::HostRequest;
use vops_core::result::HostResult;

pub use dispatcher::RequestDispatcher;
pub use http::{HttpTransport, TlsOptions};
pub use pool::ConnectionPool;
pub use progress::Spinner;
pub use scripted::ScriptedTransport;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("host {0} has no connection in the pool")]
    MissingHost(String),
    #[error("http client error: {0}")]
    Client(String),
}

/// How a response body is consumed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum BodyHandler {
    /// Read the whole body into the result.
    #[default]
    Buffer,
    /// Stream a successful body into this file.
    Download(PathBuf),
}

/// Sends one request to one host. Implementations never fail: every
/// outcome, including transport errors, is expressed as a `HostResult`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, host: &str, request: &HostRequest, body: &BodyHandler) -> HostResult;
}
