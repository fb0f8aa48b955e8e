//! Backend error types.

use thiserror::Error;

/// Errors that can occur while talking to a single backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// A stdio backend process failed to start.
    #[error("failed to spawn backend '{name}': {reason}")]
    SpawnFailed { name: String, reason: String },

    /// The connect or initialization handshake failed.
    #[error("backend '{name}' initialization failed: {reason}")]
    InitFailed { name: String, reason: String },

    /// I/O or framing failure on the underlying channel.
    #[error("transport error for backend '{backend}': {reason}")]
    TransportError { backend: String, reason: String },

    /// The backend answered with a JSON-RPC error object.
    #[error("backend error [{code}]: {message}")]
    ServerError {
        code: i32,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// A tool call completed but the backend flagged the result as an error.
    #[error("operation '{operation}' failed on backend: {message}")]
    ExecutionFailed { operation: String, message: String },

    /// A request did not complete in time.
    #[error("'{operation}' on backend '{backend}' timed out after {timeout_ms}ms")]
    Timeout {
        backend: String,
        operation: String,
        timeout_ms: u64,
    },

    /// No backend with this name is registered with the connection manager.
    #[error("backend '{name}' is not registered")]
    UnknownBackend { name: String },

    /// The backend's pool was shut down while a caller waited for a slot.
    #[error("session pool for backend '{backend}' is closed")]
    PoolClosed { backend: String },
}

impl BackendError {
    /// Whether the failure leaves the session unusable.
    ///
    /// JSON-RPC and execution errors are answers from a live backend; the
    /// session that produced them can be reused.
    pub fn is_connection_failure(&self) -> bool {
        !matches!(
            self,
            Self::ServerError { .. } | Self::ExecutionFailed { .. }
        )
    }
}
