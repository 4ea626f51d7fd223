//! vops-analysis: Reconstruct lock-wait chains and slow-event causality
//! trees from diagnostic records.
//!
//! The analyzers in [`lock_cascade`] and [`slow_cascade`] are pure functions
//! over already-fetched records. [`health::ClusterHealth`] fetches the
//! records through the operation engine and feeds them in.

pub mod display;
pub mod health;
pub mod lock_cascade;
pub mod session_info;
pub mod slow_cascade;
pub mod thread_id;

use chrono::{Duration, NaiveDateTime};
use thiserror::Error;
use vops_core::timefmt::{format_wire_time, parse_wire_time};
use vops_core::CoreError;
use vops_engine::{EngineError, OpError};

pub use health::ClusterHealth;
pub use lock_cascade::{build_lock_cascade, LockEvent, NodeLockEvents};
pub use session_info::{IdSet, SessionTxnInfo};
pub use slow_cascade::{build_slow_cascade, SlowCascade, SlowEventNode};

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("invalid {field} on event: {source}")]
    Record {
        field: &'static str,
        #[source]
        source: CoreError,
    },
    #[error("invalid time window: {0}")]
    Window(String),
    #[error(transparent)]
    Op(#[from] OpError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl AnalysisError {
    pub(crate) fn record(field: &'static str) -> impl FnOnce(CoreError) -> Self {
        move |source| AnalysisError::Record { field, source }
    }
}

/// Requested analysis window, both ends inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl TimeWindow {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Result<Self, AnalysisError> {
        if end < start {
            return Err(AnalysisError::Window(format!(
                "end time {} is before start time {}",
                format_wire_time(&end),
                format_wire_time(&start)
            )));
        }
        Ok(Self { start, end })
    }

    /// Parse wire-format bounds.
    pub fn parse(start: &str, end: &str) -> Result<Self, AnalysisError> {
        let s = parse_wire_time(start).map_err(|e| AnalysisError::Window(e.to_string()))?;
        let e = parse_wire_time(end).map_err(|e| AnalysisError::Window(e.to_string()))?;
        Self::new(s, e)
    }

    pub fn contains(&self, t: &NaiveDateTime) -> bool {
        *t >= self.start && *t <= self.end
    }

    /// The same window with its start moved back by `by`.
    pub fn with_lookback(&self, by: Duration) -> Result<Self, AnalysisError> {
        let start = self
            .start
            .checked_sub_signed(by)
            .ok_or_else(|| AnalysisError::Window(format!("lookback of {by} before {} is out of range", self.start)))?;
        Ok(Self { start, end: self.end })
    }

    pub fn start_str(&self) -> String {
        format_wire_time(&self.start)
    }

    pub fn end_str(&self) -> String {
        format_wire_time(&self.end)
    }
}
