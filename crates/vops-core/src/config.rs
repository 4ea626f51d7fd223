//! Engine and analysis configuration.
//!
//! Every field has a default, so a config file only needs the values it
//! overrides. The node-state polling timeout can also be set through the
//! `NODE_STATE_POLLING_TIMEOUT` environment variable (seconds).

use crate::timefmt;
use crate::CoreError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const POLLING_TIMEOUT_ENV: &str = "NODE_STATE_POLLING_TIMEOUT";

/// Default time to wait for nodes to converge, in seconds.
pub const STARTUP_POLLING_TIMEOUT_SECS: u64 = 300;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VopsConfig {
    pub engine: EngineConfig,
    pub analysis: AnalysisConfig,
}

impl VopsConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, CoreError> {
        let mut config: Self =
            serde_json::from_str(raw).map_err(|e| CoreError::Config(e.to_string()))?;
        config.validate()?;
        config.engine = config.engine.with_env_overrides();
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, CoreError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| CoreError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        self.engine.validate()?;
        self.analysis.validate()
    }
}

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Sleep between polling rounds.
    pub polling_interval_ms: u64,
    /// Give up polling after this many seconds.
    pub polling_timeout_secs: u64,
    /// Default per-request timeout.
    pub request_timeout_secs: u64,
    /// Per-request timeout used by polling operations.
    pub poll_request_timeout_secs: u64,
    /// Elapsed-time report cadence while waiting on hosts.
    pub progress_interval_ms: u64,
    /// Show spinners and elapsed-time reports.
    pub interactive: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            polling_interval_ms: 3_000,
            polling_timeout_secs: STARTUP_POLLING_TIMEOUT_SECS,
            request_timeout_secs: 300,
            poll_request_timeout_secs: 30,
            progress_interval_ms: 5_000,
            interactive: false,
        }
    }
}

impl EngineConfig {
    /// Apply `NODE_STATE_POLLING_TIMEOUT` if it is set and numeric.
    pub fn with_env_overrides(mut self) -> Self {
        self.polling_timeout_secs = polling_timeout_from_env(self.polling_timeout_secs);
        self
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.polling_interval_ms == 0 {
            return Err(CoreError::Config("polling_interval_ms must be > 0".into()));
        }
        if self.progress_interval_ms == 0 {
            return Err(CoreError::Config("progress_interval_ms must be > 0".into()));
        }
        if self.request_timeout_secs == 0 || self.poll_request_timeout_secs == 0 {
            return Err(CoreError::Config("request timeouts must be > 0".into()));
        }
        if self.polling_timeout() < self.polling_interval() {
            return Err(CoreError::Config(
                "polling_timeout_secs must not be shorter than polling_interval_ms".into(),
            ));
        }
        Ok(())
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }

    pub fn polling_timeout(&self) -> Duration {
        Duration::from_secs(self.polling_timeout_secs)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }
}

/// Read the polling timeout override. Negative values clamp to zero;
/// unset or non-numeric values fall back to `default`.
pub fn polling_timeout_from_env(default: u64) -> u64 {
    match std::env::var(POLLING_TIMEOUT_ENV) {
        Ok(raw) => parse_timeout_override(&raw, default),
        Err(_) => default,
    }
}

fn parse_timeout_override(raw: &str, default: u64) -> u64 {
    match raw.trim().parse::<i64>() {
        Ok(v) => v.max(0) as u64,
        Err(_) => default,
    }
}

// ---------------------------------------------------------------------------
// AnalysisConfig
// ---------------------------------------------------------------------------

/// Upper bound for the analysis lookbacks and thresholds: 30 days.
pub const MAX_ANALYSIS_SPAN_SECS: u64 = 30 * 24 * 3600;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// How far before the requested start to look for lock waits. Matches
    /// the database's lock timeout.
    pub lock_lookback_secs: u64,
    /// Lock-wait series spanning this long or less are dropped.
    pub min_lock_wait_series_secs: u64,
    pub max_lock_wait_events: usize,
    pub max_lock_hold_events: usize,
    pub lock_attempts_limit: usize,
    pub lock_releases_limit: usize,
    /// Server-side minimum wait duration, `HH:MM:SS`.
    pub lock_attempt_threshold: String,
    /// Server-side minimum hold duration, `HH:MM:SS`.
    pub lock_release_threshold: String,
    pub slow_event_lookback_secs: u64,
    pub max_cascade_depth: usize,
    pub max_prior_hold_events: usize,
    /// Session id of events raised by the database itself.
    pub internal_session_id: String,
    /// Resolve session and transaction ids into their start records.
    pub fetch_session_txn_info: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            lock_lookback_secs: 45 * 60,
            min_lock_wait_series_secs: 10,
            max_lock_wait_events: 10,
            max_lock_hold_events: 3,
            lock_attempts_limit: 40_960,
            lock_releases_limit: 10_240,
            lock_attempt_threshold: "00:00:30".into(),
            lock_release_threshold: "00:00:30".into(),
            slow_event_lookback_secs: 5 * 60,
            max_cascade_depth: 10,
            max_prior_hold_events: 5,
            internal_session_id: "NO NODE:0x1".into(),
            fetch_session_txn_info: true,
        }
    }
}

impl AnalysisConfig {
    pub fn validate(&self) -> Result<(), CoreError> {
        timefmt::parse_duration(&self.lock_attempt_threshold)
            .map_err(|e| CoreError::Config(format!("lock_attempt_threshold: {e}")))?;
        timefmt::parse_duration(&self.lock_release_threshold)
            .map_err(|e| CoreError::Config(format!("lock_release_threshold: {e}")))?;
        if self.max_lock_wait_events == 0 {
            return Err(CoreError::Config("max_lock_wait_events must be > 0".into()));
        }
        if self.max_cascade_depth == 0 {
            return Err(CoreError::Config("max_cascade_depth must be > 0".into()));
        }
        for (name, secs) in [
            ("lock_lookback_secs", self.lock_lookback_secs),
            ("slow_event_lookback_secs", self.slow_event_lookback_secs),
            ("min_lock_wait_series_secs", self.min_lock_wait_series_secs),
        ] {
            if secs > MAX_ANALYSIS_SPAN_SECS {
                return Err(CoreError::Config(format!(
                    "{name} must be at most {MAX_ANALYSIS_SPAN_SECS}"
                )));
            }
        }
        Ok(())
    }

    pub fn lock_lookback(&self) -> chrono::Duration {
        span(self.lock_lookback_secs)
    }

    pub fn slow_event_lookback(&self) -> chrono::Duration {
        span(self.slow_event_lookback_secs)
    }

    pub fn min_lock_wait_series(&self) -> chrono::Duration {
        span(self.min_lock_wait_series_secs)
    }
}

/// Saturates instead of overflowing on unvalidated values.
fn span(secs: u64) -> chrono::Duration {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or(chrono::Duration::MAX)
}
