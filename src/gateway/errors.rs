//! Caller-facing error types.
//!
//! Nothing a caller does can crash the gateway: every failure on the call
//! path becomes one of these and is rendered as a structured result.

use serde_json::{json, Value};
use thiserror::Error;

use crate::backend::BackendError;

/// JSON-RPC code a backend uses for an unknown resource URI.
const RESOURCE_NOT_FOUND_CODE: i32 = -32002;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Backend '{backend}' not found. Available: {available:?}")]
    BackendNotFound {
        backend: String,
        available: Vec<String>,
    },

    #[error("Operation '{operation}' not found on backend '{backend}'. Available: {available:?}")]
    OperationNotFound {
        backend: String,
        operation: String,
        available: Vec<String>,
    },

    #[error("Resource '{uri}' not found on backend '{backend}'")]
    ResourceNotFound { backend: String, uri: String },

    /// The method string is not `backend` / `backend.operation`.
    #[error("invalid method '{method}': {reason}")]
    InvalidMethod { method: String, reason: String },

    /// Missing or mistyped front-end parameters.
    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// Arguments rejected before the backend was contacted.
    #[error("Argument validation failed: {message}")]
    Validation {
        message: String,
        schema: Value,
        compact_schema: String,
    },

    /// The backend ran the operation and reported a failure.
    #[error("Error executing '{backend}.{operation}': {message}")]
    BackendExecution {
        backend: String,
        operation: String,
        message: String,
    },

    #[error("'{backend}.{operation}' timed out after {timeout_ms}ms")]
    Timeout {
        backend: String,
        operation: String,
        timeout_ms: u64,
    },

    #[error("connection to backend '{backend}' failed: {reason}")]
    Connection { backend: String, reason: String },
}

impl GatewayError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::BackendNotFound { .. } => "BACKEND_NOT_FOUND",
            Self::OperationNotFound { .. } => "OPERATION_NOT_FOUND",
            Self::ResourceNotFound { .. } => "RESOURCE_NOT_FOUND",
            Self::InvalidMethod { .. } => "INVALID_METHOD",
            Self::InvalidRequest { .. } => "INVALID_REQUEST",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::BackendExecution { .. } => "EXECUTION_ERROR",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Connection { .. } => "CONNECTION_ERROR",
        }
    }

    /// Structured error object returned to callers.
    pub fn to_value(&self) -> Value {
        let mut value = json!({
            "error": self.to_string(),
            "code": self.code(),
        });
        let Some(obj) = value.as_object_mut() else {
            return value;
        };

        match self {
            Self::BackendNotFound { available, .. } => {
                if available.is_empty() {
                    obj.insert("hint".into(), json!("No backends are currently connected"));
                } else {
                    obj.insert("available_backends".into(), json!(available));
                }
            }
            Self::OperationNotFound { available, .. } => {
                obj.insert("available_operations".into(), json!(available));
            }
            Self::Validation {
                schema,
                compact_schema,
                ..
            } => {
                obj.insert("schema".into(), json!(compact_schema));
                obj.insert("input_schema".into(), schema.clone());
            }
            _ => {}
        }
        value
    }

    /// Classify a failure from a backend session during `operation`.
    pub fn from_backend(backend: &str, operation: &str, error: BackendError) -> Self {
        match error {
            BackendError::Timeout { timeout_ms, .. } => Self::Timeout {
                backend: backend.to_string(),
                operation: operation.to_string(),
                timeout_ms,
            },
            BackendError::ExecutionFailed { message, .. } | BackendError::ServerError { message, .. } => {
                Self::BackendExecution {
                    backend: backend.to_string(),
                    operation: operation.to_string(),
                    message,
                }
            }
            other => Self::Connection {
                backend: backend.to_string(),
                reason: other.to_string(),
            },
        }
    }

    /// Like [`from_backend`](Self::from_backend), but a backend's own
    /// "resource not found" answer maps to `ResourceNotFound`.
    pub fn from_read(backend: &str, uri: &str, error: BackendError) -> Self {
        match error {
            BackendError::ServerError { code, .. } if code == RESOURCE_NOT_FOUND_CODE => {
                Self::ResourceNotFound {
                    backend: backend.to_string(),
                    uri: uri.to_string(),
                }
            }
            other => Self::from_backend(backend, "resources/read", other),
        }
    }
}
