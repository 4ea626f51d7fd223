//! Diagnostic records fetched from the cluster's data collector tables.
//!
//! Identifier fields arrive as integers from some endpoints and as strings
//! from others; they are normalized to strings on decode.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Lock events
// ---------------------------------------------------------------------------

/// One lock wait (a lock that was requested and waited on).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockAttempt {
    pub description: String,
    /// Wait duration, `HH:MM:SS[.fff]`.
    pub duration: String,
    pub mode: String,
    pub node_name: String,
    #[serde(deserialize_with = "flex::string")]
    pub object: String,
    pub object_name: String,
    pub session_id: String,
    pub start_time: String,
    pub time: String,
    #[serde(deserialize_with = "flex::string")]
    pub transaction_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_info: Option<TransactionStart>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_info: Option<SessionStart>,
}

/// One lock release (a lock that was held from grant time until `time`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockRelease {
    /// Hold duration, `HH:MM:SS[.fff]`.
    pub duration: String,
    pub node_name: String,
    #[serde(deserialize_with = "flex::string")]
    pub object: String,
    pub object_name: String,
    pub session_id: String,
    pub grant_time: String,
    pub time: String,
    #[serde(deserialize_with = "flex::string")]
    pub transaction_id: String,
    #[serde(deserialize_with = "flex::string")]
    pub user_id: String,
    pub user_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_info: Option<TransactionStart>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_info: Option<SessionStart>,
}

// ---------------------------------------------------------------------------
// Slow events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlowEvent {
    #[serde(alias = "time")]
    pub timestamp: String,
    pub node_name: String,
    pub session_id: String,
    #[serde(deserialize_with = "flex::string")]
    pub user_id: String,
    pub user_name: String,
    #[serde(deserialize_with = "flex::string")]
    pub txn_id: String,
    #[serde(deserialize_with = "flex::string")]
    pub statement_id: String,
    #[serde(deserialize_with = "flex::string")]
    pub request_id: String,
    pub event_description: String,
    #[serde(deserialize_with = "flex::int")]
    pub threshold_us: i64,
    #[serde(deserialize_with = "flex::int")]
    pub duration_us: i64,
    /// Phase breakdown; referenced threads appear as `[<hex id>]`.
    pub phases_duration_us: String,
    #[serde(deserialize_with = "flex::string")]
    pub thread_id: String,
    pub val3: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_info: Option<TransactionStart>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_info: Option<SessionStart>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SlowEventList {
    #[serde(rename = "dc_slow_event_list", default)]
    pub events: Vec<SlowEvent>,
}

// ---------------------------------------------------------------------------
// Session and transaction starts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionStart {
    pub timestamp: String,
    pub node_name: String,
    pub session_id: String,
    #[serde(deserialize_with = "flex::string")]
    pub user_id: String,
    pub user_name: String,
    pub client_hostname: String,
    #[serde(deserialize_with = "flex::string")]
    pub client_pid: String,
    pub client_label: String,
    pub client_type: String,
    pub client_version: String,
    pub client_os: String,
    pub client_os_user_name: String,
    pub client_os_hostname: String,
    pub ssl_state: String,
    pub tls_version: String,
    pub ssl_client_subject: String,
    pub ssl_client_fingerprint: String,
    pub ssl_ca_subject: String,
    pub ssl_ca_fingerprint: String,
    pub authentication_method: String,
    pub client_authentication_name: String,
    pub is_internal: bool,
    pub requested_protocol: String,
    pub effective_protocol: String,
    pub session_type: String,
    pub is_binary_transfer: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStartList {
    #[serde(rename = "dc_session_starts_list", default)]
    pub sessions: Vec<SessionStart>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionStart {
    pub timestamp: String,
    pub node_name: String,
    pub session_id: String,
    #[serde(deserialize_with = "flex::string")]
    pub user_id: String,
    pub user_name: String,
    #[serde(deserialize_with = "flex::string")]
    pub txn_id: String,
    pub description: String,
    pub start_timestamp: String,
    pub isolation: String,
    pub is_read_only: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionStartList {
    #[serde(rename = "dc_transaction_starts_list", default)]
    pub transactions: Vec<TransactionStart>,
}

// ---------------------------------------------------------------------------
// Session / transaction correlation
// ---------------------------------------------------------------------------

/// Records that reference a session and a transaction and can carry their
/// start records once resolved.
pub trait SessionTxnRef {
    fn session_id(&self) -> &str;
    fn txn_id(&self) -> &str;
    fn attach(&mut self, session: Option<&SessionStart>, txn: Option<&TransactionStart>);
}

macro_rules! impl_session_txn_ref {
    ($ty:ty, $txn_field:ident) => {
        impl SessionTxnRef for $ty {
            fn session_id(&self) -> &str {
                &self.session_id
            }

            fn txn_id(&self) -> &str {
                &self.$txn_field
            }

            fn attach(&mut self, session: Option<&SessionStart>, txn: Option<&TransactionStart>) {
                if let Some(s) = session {
                    self.session_info = Some(s.clone());
                }
                if let Some(t) = txn {
                    self.transaction_info = Some(t.clone());
                }
            }
        }
    };
}

impl_session_txn_ref!(LockAttempt, transaction_id);
impl_session_txn_ref!(LockRelease, transaction_id);
impl_session_txn_ref!(SlowEvent, txn_id);

// ---------------------------------------------------------------------------
// Lenient field decoding
// ---------------------------------------------------------------------------

pub(crate) mod flex {
    use serde::{de::Error, Deserialize, Deserializer};
    use serde_json::Value;

    /// String, number, bool or null, rendered as a string.
    pub fn string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        match Option::<Value>::deserialize(d)? {
            None | Some(Value::Null) => Ok(String::new()),
            Some(Value::String(s)) => Ok(s),
            Some(Value::Number(n)) => Ok(n.to_string()),
            Some(Value::Bool(b)) => Ok(b.to_string()),
            Some(other) => Err(D::Error::custom(format!("expected string or number, got {other}"))),
        }
    }

    /// Integer given as a number or a decimal string.
    pub fn int<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
        match Option::<Value>::deserialize(d)? {
            None | Some(Value::Null) => Ok(0),
            Some(Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .ok_or_else(|| D::Error::custom(format!("integer out of range: {n}"))),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(0),
            Some(Value::String(s)) => s
                .trim()
                .parse::<i64>()
                .map_err(|e| D::Error::custom(format!("invalid integer '{s}': {e}"))),
            Some(other) => Err(D::Error::custom(format!("expected integer, got {other}"))),
        }
    }
}
