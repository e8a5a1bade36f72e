use chrono::{SecondsFormat, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{ErrorInfo, RpcError};

/// Request envelope published on `{prefix}:request:{channel}`.
///
/// Immutable once built. `parameters` stays a raw JSON value on both sides
/// of the wire; handlers and typed callers decide its shape at the last
/// moment.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    /// Globally unique correlation key.
    pub id: String,
    /// Logical method name on the target service.
    pub method: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub parameters: Value,
    /// Empty for notifications; otherwise the publisher's response channel.
    #[serde(default)]
    pub response_channel: String,
    pub timestamp: String,
    /// Advisory deadline hint from the caller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl Request {
    /// Builds a request expecting a response on `response_channel`, stamped
    /// with a fresh id and the current UTC time.
    pub fn new(
        method: impl Into<String>,
        parameters: Value,
        response_channel: impl Into<String>,
        timeout_ms: Option<u64>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            method: method.into(),
            parameters,
            response_channel: response_channel.into(),
            timestamp: utc_timestamp(),
            timeout_ms,
        }
    }

    /// Builds a fire-and-forget notification (empty response channel).
    pub fn notification(method: impl Into<String>, parameters: Value) -> Self {
        Self::new(method, parameters, String::new(), None)
    }

    /// True when no response is expected.
    pub fn is_notification(&self) -> bool {
        self.response_channel.is_empty()
    }

    /// Encodes the envelope as UTF-8 JSON.
    pub fn to_bytes(&self) -> Result<Vec<u8>, RpcError> {
        serde_json::to_vec(self).map_err(RpcError::from)
    }

    /// Decodes an envelope from UTF-8 JSON. Unknown fields are ignored.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RpcError> {
        serde_json::from_slice(bytes).map_err(RpcError::from)
    }
}

/// Response envelope published on the request's `responseChannel`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    /// Equal to the originating request's id.
    pub id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub result: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    pub timestamp: String,
}

impl Response {
    /// Builds a success response carrying `result`.
    pub fn success(id: impl Into<String>, result: Value) -> Self {
        Self {
            id: id.into(),
            success: true,
            result,
            error: None,
            timestamp: utc_timestamp(),
        }
    }

    /// Builds a failure response carrying `error`.
    pub fn failure(id: impl Into<String>, error: ErrorInfo) -> Self {
        Self {
            id: id.into(),
            success: false,
            result: Value::Null,
            error: Some(error),
            timestamp: utc_timestamp(),
        }
    }

    /// Encodes the envelope as UTF-8 JSON.
    pub fn to_bytes(&self) -> Result<Vec<u8>, RpcError> {
        serde_json::to_vec(self).map_err(RpcError::from)
    }

    /// Decodes an envelope from UTF-8 JSON. Unknown fields are ignored.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RpcError> {
        serde_json::from_slice(bytes).map_err(RpcError::from)
    }
}

/// Coerces a raw JSON result into a caller-chosen type.
///
/// Primitives resolve directly from the JSON value; structured types
/// round-trip through serde deserialization.
pub fn coerce_result<T: DeserializeOwned>(raw: Value) -> Result<T, RpcError> {
    serde_json::from_value(raw).map_err(RpcError::from)
}

fn utc_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
