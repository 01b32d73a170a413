//! IPC protocol types and validation for sentinel-daemon.
//!
//! This crate is shared by the daemon and its clients to prevent schema drift.
//! The daemon remains the authority on validation, but clients can reuse the
//! same types to construct valid requests.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_REQUEST_BYTES: usize = 1024 * 1024; // 1MB
/// Upper bound on `limit` for event queries; matches the feed's buffer size.
pub const MAX_EVENT_LIMIT: usize = 500;
pub const ERROR_TOO_MANY_CONNECTIONS: &str = "too_many_connections";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Method {
    GetHealth,
    Event,
    GetSnapshot,
    GetStats,
    GetRecentEvents,
    GetActiveRuns,
    GetCompletedRuns,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub protocol_version: u32,
    pub method: Method,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(method: Method, params: Option<Value>) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            method,
            id: None,
            params,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl Response {
    pub fn ok(id: Option<String>, data: Value) -> Self {
        Self {
            ok: true,
            id,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: Option<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(ErrorInfo::new(code, message)),
        }
    }

    pub fn error_with_info(id: Option<String>, error: ErrorInfo) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(error),
        }
    }
}

/// Result of an accepted `event` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventAck {
    pub accepted: bool,
    pub sequence: u64,
}

/// Params for `get_snapshot` and `get_recent_events`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EventQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Parses optional query params. `limit` must be positive and is capped at
/// [`MAX_EVENT_LIMIT`].
pub fn parse_event_query(params: Option<Value>) -> Result<EventQuery, ErrorInfo> {
    let Some(params) = params.filter(|value| !value.is_null()) else {
        return Ok(EventQuery::default());
    };
    if !params.is_object() {
        return Err(ErrorInfo::new("invalid_params", "params must be an object"));
    }

    let query: EventQuery = serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new("invalid_params", format!("invalid query params: {}", err))
    })?;

    match query.limit {
        Some(0) => Err(ErrorInfo::new(
            "invalid_params",
            "limit must be greater than zero",
        )),
        Some(limit) => Ok(EventQuery {
            limit: Some(limit.min(MAX_EVENT_LIMIT)),
        }),
        None => Ok(query),
    }
}

/// The raw gateway envelope carried by an `event` request. Any JSON value is
/// accepted; the feed classifies malformed envelopes as `unknown`.
pub fn event_envelope(params: Option<Value>) -> Value {
    params.unwrap_or(Value::Null)
}
