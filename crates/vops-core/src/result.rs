//! Host results: the outcome of one request to one host.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const SUCCESS_CODE: u16 = 200;
pub const UNAUTHORIZED_CODE: u16 = 401;
pub const PRECONDITION_FAILED_CODE: u16 = 412;
pub const INTERNAL_ERROR_CODE: u16 = 500;

const WRONG_CREDENTIAL_MESSAGES: &[&str] = &["Wrong password", "Wrong certificate"];

// ---------------------------------------------------------------------------
// Status classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultStatus {
    Success,
    Failure,
    Exception,
    #[serde(rename = "EOF_EXCEPTION")]
    Eof,
}

impl ResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
            Self::Exception => "EXCEPTION",
            Self::Eof => "EOF_EXCEPTION",
        }
    }
}

/// Error attached to a non-passing host result.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HostError {
    #[error("status code {code} returned from host {host}: {detail}")]
    Status { host: String, code: u16, detail: String },
    #[error("request to host {host} timed out after {secs}s")]
    Timeout { host: String, secs: u64 },
    #[error("unexpected EOF from host {host}: {message}")]
    Eof { host: String, message: String },
    #[error("request to host {host} failed: {message}")]
    Transport { host: String, message: String },
}

// ---------------------------------------------------------------------------
// HostResult
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostResult {
    pub host: String,
    pub status: ResultStatus,
    /// HTTP status code, 0 when no response was received.
    pub status_code: u16,
    /// Raw response body.
    pub content: String,
    pub error: Option<HostError>,
}

impl HostResult {
    pub fn success(host: &str, status_code: u16, content: impl Into<String>) -> Self {
        Self {
            host: host.to_string(),
            status: ResultStatus::Success,
            status_code,
            content: content.into(),
            error: None,
        }
    }

    /// Non-2xx response. The error detail is taken from an RFC 7807 body
    /// when one is present, otherwise the raw body is used.
    pub fn failure(host: &str, status_code: u16, content: impl Into<String>) -> Self {
        let content = content.into();
        let detail = problem_detail(&content).unwrap_or_else(|| content.clone());
        Self {
            host: host.to_string(),
            status: ResultStatus::Failure,
            status_code,
            error: Some(HostError::Status {
                host: host.to_string(),
                code: status_code,
                detail,
            }),
            content,
        }
    }

    pub fn exception(host: &str, message: impl Into<String>) -> Self {
        Self {
            host: host.to_string(),
            status: ResultStatus::Exception,
            status_code: 0,
            content: String::new(),
            error: Some(HostError::Transport {
                host: host.to_string(),
                message: message.into(),
            }),
        }
    }

    pub fn timeout(host: &str, secs: u64) -> Self {
        Self {
            host: host.to_string(),
            status: ResultStatus::Exception,
            status_code: 0,
            content: String::new(),
            error: Some(HostError::Timeout {
                host: host.to_string(),
                secs,
            }),
        }
    }

    pub fn eof(host: &str, message: impl Into<String>) -> Self {
        Self {
            host: host.to_string(),
            status: ResultStatus::Eof,
            status_code: 0,
            content: String::new(),
            error: Some(HostError::Eof {
                host: host.to_string(),
                message: message.into(),
            }),
        }
    }

    pub fn is_passing(&self) -> bool {
        self.error.is_none()
    }

    pub fn is_failing(&self) -> bool {
        self.status == ResultStatus::Failure
    }

    pub fn is_exception(&self) -> bool {
        self.status == ResultStatus::Exception
    }

    pub fn is_eof(&self) -> bool {
        self.status == ResultStatus::Eof
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.error, Some(HostError::Timeout { .. }))
    }

    pub fn is_success(&self) -> bool {
        self.status_code == SUCCESS_CODE
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status_code == UNAUTHORIZED_CODE
    }

    /// 412: the local node has not joined the cluster yet.
    pub fn has_precondition_failed(&self) -> bool {
        self.status_code == PRECONDITION_FAILED_CODE
    }

    pub fn is_internal_error(&self) -> bool {
        self.status_code == INTERNAL_ERROR_CODE
    }

    /// The HTTPS service answered, even if it refused the request.
    pub fn is_http_running(&self) -> bool {
        self.is_passing()
            || self.is_unauthorized()
            || self.is_internal_error()
            || self.has_precondition_failed()
    }

    /// 401 caused by a wrong password or certificate rather than a node
    /// that has not joined yet.
    pub fn is_credential_error(&self) -> bool {
        if !self.is_unauthorized() {
            return false;
        }
        let detail = self.error.as_ref().map(|e| e.to_string()).unwrap_or_default();
        WRONG_CREDENTIAL_MESSAGES
            .iter()
            .any(|msg| self.content.contains(msg) || detail.contains(msg))
    }

    pub fn is_connection_refused(&self) -> bool {
        match &self.error {
            Some(HostError::Transport { message, .. }) => {
                message.to_lowercase().contains("connection refused")
            }
            _ => false,
        }
    }
}

/// Pull `detail` (or `title`) out of an RFC 7807 problem body.
fn problem_detail(content: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(content).ok()?;
    let obj = value.as_object()?;
    obj.get("detail")
        .or_else(|| obj.get("title"))
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
