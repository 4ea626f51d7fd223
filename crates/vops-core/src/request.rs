//! Per-host request description and the per-operation request/result set.

use crate::result::HostResult;
use crate::CoreError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Port of the per-host management agent.
pub const NMA_PORT: u16 = 5554;
/// Port of the database's own HTTPS service.
pub const HTTPS_PORT: u16 = 8443;
/// Current endpoint version prefix, shared by both surfaces.
pub const API_VERSION: &str = "v1/";

const MASKED_VALUE: &str = "******";
const SENSITIVE_KEYS: &[&str] = &[
    "password",
    "db_password",
    "aws_access_key_id",
    "aws_secret_access_key",
];
const SENSITIVE_PARAMETERS: &[&str] = &[
    "awsauth",
    "awssessiontoken",
    "gcsauth",
    "azurestoragecredentials",
];

// ---------------------------------------------------------------------------
// Method and authentication
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Put,
    Post,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Put => "PUT",
            Self::Post => "POST",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a request authenticates against the target service.
#[derive(Clone, Default, PartialEq, Eq)]
pub enum Auth {
    /// No credentials (NMA requests, or certificates configured on the client).
    #[default]
    None,
    /// HTTP basic auth.
    Password { username: String, password: String },
    /// Mutual TLS with the client certificate configured on the transport.
    Certificate,
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Password { username, .. } => f
                .debug_struct("Password")
                .field("username", username)
                .field("password", &MASKED_VALUE)
                .finish(),
            Self::Certificate => f.write_str("Certificate"),
        }
    }
}

// ---------------------------------------------------------------------------
// HostRequest
// ---------------------------------------------------------------------------

/// One logical request to one host.
#[derive(Debug, Clone, Default)]
pub struct HostRequest {
    pub method: HttpMethod,
    /// Endpoint path including the version prefix, e.g. `v1/nodes`.
    pub endpoint: String,
    /// Target the management agent instead of the HTTPS service.
    pub is_nma: bool,
    pub query_params: BTreeMap<String, String>,
    /// Raw JSON body.
    pub body: Option<String>,
    /// Per-request timeout override in seconds.
    pub timeout_secs: Option<u64>,
    pub auth: Auth,
}

impl HostRequest {
    pub fn nma(method: HttpMethod, endpoint: &str) -> Self {
        Self {
            method,
            endpoint: format!("{API_VERSION}{endpoint}"),
            is_nma: true,
            ..Default::default()
        }
    }

    pub fn https(method: HttpMethod, endpoint: &str) -> Self {
        Self {
            method,
            endpoint: format!("{API_VERSION}{endpoint}"),
            is_nma: false,
            ..Default::default()
        }
    }

    pub fn with_query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query_params.insert(key.to_string(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_json_body<T: Serialize>(self, body: &T) -> Result<Self, CoreError> {
        let raw = serde_json::to_string(body).map_err(|e| CoreError::Json(e.to_string()))?;
        Ok(self.with_body(raw))
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// NMA endpoints never take password auth.
    pub fn with_auth(mut self, auth: Auth) -> Self {
        if !(self.is_nma && matches!(auth, Auth::Password { .. })) {
            self.auth = auth;
        }
        self
    }

    pub fn port(&self) -> u16 {
        if self.is_nma {
            NMA_PORT
        } else {
            HTTPS_PORT
        }
    }

    /// Full URL for `host`: `https://host:port/v1/endpoint?query`.
    pub fn url(&self, host: &str) -> Result<url::Url, CoreError> {
        let authority = if host.contains(':') && !host.starts_with('[') {
            format!("[{host}]")
        } else {
            host.to_string()
        };
        let raw = format!("https://{authority}:{}/{}", self.port(), self.endpoint);
        let mut url = url::Url::parse(&raw).map_err(|e| CoreError::Url(format!("{raw}: {e}")))?;
        // Timestamps must reach the server with %20, not form-encoded '+'.
        if !self.query_params.is_empty() {
            let query = self
                .query_params
                .iter()
                .map(|(k, v)| format!("{k}={}", v.replace('&', "%26")))
                .collect::<Vec<_>>()
                .join("&");
            url.set_query(Some(&query));
        }
        Ok(url)
    }

    /// Body with credentials replaced, suitable for logging.
    pub fn masked_body(&self) -> Option<String> {
        let body = self.body.as_ref()?;
        match serde_json::from_str::<serde_json::Value>(body) {
            Ok(mut value) => {
                mask_value(&mut value);
                Some(value.to_string())
            }
            Err(_) => Some(body.clone()),
        }
    }
}

fn mask_value(value: &mut serde_json::Value) {
    let Some(obj) = value.as_object_mut() else {
        return;
    };
    for (key, v) in obj.iter_mut() {
        if SENSITIVE_KEYS.contains(&key.as_str()) {
            *v = serde_json::Value::String(MASKED_VALUE.into());
        } else if key == "parameters" {
            if let Some(params) = v.as_object_mut() {
                for (pk, pv) in params.iter_mut() {
                    if SENSITIVE_PARAMETERS.contains(&pk.to_lowercase().as_str()) {
                        *pv = serde_json::Value::String(MASKED_VALUE.into());
                    }
                }
            }
        } else if v.is_object() {
            mask_value(v);
        }
    }
}

// ---------------------------------------------------------------------------
// ClusterRequest
// ---------------------------------------------------------------------------

/// Requests of one operation keyed by host, plus the results collected for them.
#[derive(Debug, Clone, Default)]
pub struct ClusterRequest {
    /// Name of the owning operation, used in logs.
    pub name: String,
    pub requests: BTreeMap<String, HostRequest>,
    pub results: BTreeMap<String, HostResult>,
}

impl ClusterRequest {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn insert(&mut self, host: &str, request: HostRequest) {
        self.requests.insert(host.to_string(), request);
    }

    pub fn hosts(&self) -> Vec<String> {
        self.requests.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_https_and_nma_urls() {
        let req = HostRequest::https(HttpMethod::Get, "nodes");
        assert_eq!(
            req.url("10.0.0.1").unwrap().as_str(),
            "https://10.0.0.1:8443/v1/nodes"
        );

        let req = HostRequest::nma(HttpMethod::Post, "dc/lock-attempts");
        assert_eq!(
            req.url("db-host").unwrap().as_str(),
            "https://db-host:5554/v1/dc/lock-attempts"
        );
    }

    #[test]
    fn query_params_are_encoded() {
        let req = HostRequest::https(HttpMethod::Get, "dc/slow-events")
            .with_query("start-time", "2024-01-01 10:00:00")
            .with_query("node-name", "v_db_node0001");
        let url = req.url("h1").unwrap();
        assert!(url.as_str().contains("start-time=2024-01-01%2010:00:00"));
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("start-time".into(), "2024-01-01 10:00:00".into())));
        assert!(pairs.contains(&("node-name".into(), "v_db_node0001".into())));
    }

    #[test]
    fn ipv6_hosts_are_bracketed() {
        let req = HostRequest::https(HttpMethod::Get, "health");
        assert_eq!(
            req.url("::1").unwrap().as_str(),
            "https://[::1]:8443/v1/health"
        );
    }

    #[test]
    fn nma_rejects_password_auth() {
        let req = HostRequest::nma(HttpMethod::Get, "health").with_auth(Auth::Password {
            username: "dbadmin".into(),
            password: "secret".into(),
        });
        assert_eq!(req.auth, Auth::None);

        let req = HostRequest::https(HttpMethod::Get, "health").with_auth(Auth::Password {
            username: "dbadmin".into(),
            password: "secret".into(),
        });
        assert!(matches!(req.auth, Auth::Password { .. }));
        assert!(!format!("{:?}", req.auth).contains("secret"));
    }

    #[test]
    fn masks_sensitive_body_fields() {
        let req = HostRequest::nma(HttpMethod::Post, "catalog/revive")
            .with_json_body(&serde_json::json!({
                "db_name": "db",
                "aws_secret_access_key": "abc",
                "parameters": {"awsauth": "id:key", "awsregion": "us-east-1"},
                "sql": {"password": "pw"}
            }))
            .unwrap();
        let masked = req.masked_body().unwrap();
        assert!(!masked.contains("abc"));
        assert!(!masked.contains("id:key"));
        assert!(!masked.contains("\"pw\""));
        assert!(masked.contains("us-east-1"));
    }
}
