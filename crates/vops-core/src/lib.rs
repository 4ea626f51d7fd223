//! vops-core: Shared types for cluster operations.
//!
//! This crate has zero internal crate dependencies and defines the
//! canonical types used across all other vops-* crates.

pub mod config;
pub mod events;
pub mod node;
pub mod request;
pub mod result;
pub mod timefmt;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("invalid time format: {0}")]
    TimeFormat(String),
    #[error("invalid duration: {0}")]
    Duration(String),
    #[error("json error: {0}")]
    Json(String),
    #[error("invalid url: {0}")]
    Url(String),
}

/// Re-export commonly used types.
pub mod prelude {
    pub use crate::config::{AnalysisConfig, EngineConfig};
    pub use crate::events::{LockAttempt, LockRelease, SessionStart, SlowEvent, TransactionStart};
    pub use crate::node::{NodeState, NodeStateInfo, NodesStateInfo};
    pub use crate::request::{Auth, ClusterRequest, HostRequest, HttpMethod};
    pub use crate::result::{HostError, HostResult, ResultStatus};
    pub use crate::CoreError;
}
