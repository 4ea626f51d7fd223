//! vops-engine: Run ordered lists of cluster operations against one shared
//! execution context, stopping at the first failure.

pub mod context;
pub mod engine;
pub mod logging;
pub mod operation;
pub mod polling;

use thiserror::Error;
use vops_core::result::HostError;
use vops_core::CoreError;
use vops_transport::TransportError;

pub use context::ExecContext;
pub use engine::{ClusterOpEngine, EngineRunRecord, RunStatus};
pub use operation::{has_quorum, ClusterOp, OpBase, OpCredentials};
pub use polling::{poll_state, PollingOp};

#[derive(Debug, Error)]
pub enum OpError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("dispatch error: {0}")]
    Dispatch(#[from] TransportError),
    #[error(transparent)]
    Host(#[from] HostError),
    #[error("wrong password/certificates for https service on host {host}")]
    Unauthorized { host: String },
    #[error("fail to parse result on host {host}, details: {message}")]
    Parse { host: String, message: String },
    #[error("quorum not reached: {success} of {primaries} primary node(s) succeeded")]
    Quorum { success: usize, primaries: usize },
    #[error("hosts {hosts:?} did not converge after {timeout_secs} seconds: {detail}")]
    PollTimeout {
        timeout_secs: u64,
        hosts: Vec<String>,
        detail: String,
    },
    #[error("{0}")]
    Failed(String),
    #[error("{}", join_messages(.0))]
    Multiple(Vec<OpError>),
}

impl From<CoreError> for OpError {
    fn from(e: CoreError) -> Self {
        OpError::Config(e.to_string())
    }
}

fn join_messages(errors: &[OpError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Accumulates per-host errors so every failing host stays visible.
#[derive(Debug, Default)]
pub struct ErrorJoin {
    errors: Vec<OpError>,
}

impl ErrorJoin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, err: impl Into<OpError>) {
        match err.into() {
            OpError::Multiple(inner) => self.errors.extend(inner),
            other => self.errors.push(other),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// `Ok` when nothing was pushed, the lone error when one was, and
    /// `Multiple` otherwise.
    pub fn into_result(mut self) -> Result<(), OpError> {
        match self.errors.len() {
            0 => Ok(()),
            1 => Err(self.errors.remove(0)),
            _ => Err(OpError::Multiple(self.errors)),
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("[{op}] {source}")]
    Operation { op: String, source: OpError },
    #[error("configuration error: {0}")]
    Config(String),
}

impl EngineError {
    pub fn op_name(&self) -> Option<&str> {
        match self {
            Self::Operation { op, .. } => Some(op),
            Self::Config(_) => None,
        }
    }

    pub fn op_error(&self) -> Option<&OpError> {
        match self {
            Self::Operation { source, .. } => Some(source),
            Self::Config(_) => None,
        }
    }
}
