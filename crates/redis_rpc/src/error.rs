use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// Wire code for errors of unknown origin.
pub const CODE_UNKNOWN: i32 = 0;
/// Wire code for a method missing from the target service.
pub const CODE_METHOD_NOT_FOUND: i32 = 1001;
/// Wire code for handler-rejected parameters.
pub const CODE_INVALID_PARAMETERS: i32 = 1002;
/// Wire code for unexpected handler failures.
pub const CODE_INTERNAL_ERROR: i32 = 1003;
/// Wire code for an expired deadline.
pub const CODE_TIMEOUT: i32 = 1004;
/// Wire code for encode/decode failures.
pub const CODE_SERIALIZATION_ERROR: i32 = 1005;
/// Wire code for transport failures.
pub const CODE_CONNECTION_ERROR: i32 = 1006;

/// Error record carried by a failure [`Response`](crate::Response).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
}

/// Errors raised by the RPC fabric.
///
/// The first seven variants mirror the wire taxonomy; the rest are
/// local-only conditions (argument validation, lifecycle, cancellation)
/// that never travel in a failure response.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("method `{method}` was not found on the target service")]
    MethodNotFound { method: String },
    #[error("{message}")]
    InvalidParameters {
        message: String,
        details: Option<Value>,
    },
    #[error("timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("serialization failed: {message}")]
    Serialization {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },
    #[error("transport failure: {0}")]
    Connection(String),
    #[error("{message}")]
    Internal {
        message: String,
        details: Option<Value>,
        stack_trace: Option<String>,
    },
    #[error("{message}")]
    Unknown { message: String },
    #[error("channel must not be empty")]
    EmptyChannel,
    #[error("method must not be empty")]
    EmptyMethod,
    #[error("request id `{0}` is already pending")]
    DuplicateRequestId(String),
    #[error("request was cancelled")]
    Cancelled,
    #[error("instance has been shut down")]
    Disposed,
}

impl From<serde_json::Error> for RpcError {
    fn from(source: serde_json::Error) -> Self {
        RpcError::Serialization {
            message: source.to_string(),
            source: Some(source),
        }
    }
}

impl RpcError {
    /// Convenience constructor for handler-side parameter rejection.
    pub fn invalid_parameters(message: impl Into<String>, details: impl Into<Option<Value>>) -> Self {
        RpcError::InvalidParameters {
            message: message.into(),
            details: details.into(),
        }
    }

    /// Convenience constructor for handler-side internal failures.
    pub fn internal(message: impl Into<String>) -> Self {
        RpcError::Internal {
            message: message.into(),
            details: None,
            stack_trace: None,
        }
    }

    /// Stable wire code for this error.
    pub fn wire_code(&self) -> i32 {
        match self {
            RpcError::MethodNotFound { .. } => CODE_METHOD_NOT_FOUND,
            RpcError::InvalidParameters { .. } => CODE_INVALID_PARAMETERS,
            RpcError::Timeout { .. } => CODE_TIMEOUT,
            RpcError::Serialization { .. } => CODE_SERIALIZATION_ERROR,
            RpcError::Connection(_) => CODE_CONNECTION_ERROR,
            RpcError::Internal { .. } => CODE_INTERNAL_ERROR,
            _ => CODE_UNKNOWN,
        }
    }

    /// Converts into the wire error record. `include_stack_trace` gates the
    /// `stackTrace` field.
    pub fn to_error_info(&self, include_stack_trace: bool) -> ErrorInfo {
        let details = match self {
            RpcError::InvalidParameters { details, .. } | RpcError::Internal { details, .. } => {
                details.clone()
            }
            RpcError::Timeout { timeout_ms } => Some(json!({ "timeoutMs": timeout_ms })),
            _ => None,
        };
        let stack_trace = match self {
            RpcError::Internal { stack_trace, .. } if include_stack_trace => stack_trace.clone(),
            _ => None,
        };
        ErrorInfo {
            code: self.wire_code(),
            message: self.to_string(),
            details,
            stack_trace,
        }
    }

    /// Reconstitutes a typed error from a failure response.
    ///
    /// `method` is the call-site method name; the wire record's `details`
    /// field is structured data and is never used as a method name.
    pub fn from_error_info(info: ErrorInfo, method: &str) -> RpcError {
        match info.code {
            CODE_METHOD_NOT_FOUND => RpcError::MethodNotFound {
                method: method.to_string(),
            },
            CODE_INVALID_PARAMETERS => RpcError::InvalidParameters {
                message: info.message,
                details: info.details,
            },
            CODE_TIMEOUT => {
                let timeout_ms = info
                    .details
                    .as_ref()
                    .and_then(|details| details.get("timeoutMs"))
                    .and_then(Value::as_u64)
                    .unwrap_or(0);
                RpcError::Timeout { timeout_ms }
            }
            CODE_SERIALIZATION_ERROR => RpcError::Serialization {
                message: info.message,
                source: None,
            },
            CODE_CONNECTION_ERROR => RpcError::Connection(info.message),
            CODE_INTERNAL_ERROR => RpcError::Internal {
                message: info.message,
                details: info.details,
                stack_trace: info.stack_trace,
            },
            _ => RpcError::Unknown {
                message: info.message,
            },
        }
    }
}
