//! Open protocol sessions.
//!
//! A session is one handshaked connection to one backend. It is owned by
//! exactly one holder at a time (a scoped guard or a pool slot) and closed
//! exactly once.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::errors::BackendError;
use super::transport::{extract_result, open_transport, Transport};
use super::types::{
    error_codes, InitializeResult, ListResourcesPage, ListToolsPage, ResourceDefinition,
    ServerInfo, ToolDefinition, CLIENT_NAME, PROTOCOL_VERSION,
};
use crate::config::BackendConfig;

/// Upper bound on pages fetched by one list call.
const MAX_LIST_PAGES: usize = 100;

// ─── Trait ───────────────────────────────────────────────────────────────────

/// An open, handshaked session with a backend.
#[async_trait]
pub trait BackendSession: Send + Sync {
    /// Backend name this session belongs to.
    fn backend(&self) -> &str;

    /// Identity reported during the handshake.
    fn server_info(&self) -> Option<&ServerInfo>;

    /// Usage instructions reported during the handshake.
    fn instructions(&self) -> Option<&str> {
        None
    }

    /// All tools, following pagination.
    async fn list_tools(&self) -> Result<Vec<ToolDefinition>, BackendError>;

    /// All resources, following pagination. Backends without resource
    /// support yield an empty list.
    async fn list_resources(&self) -> Result<Vec<ResourceDefinition>, BackendError>;

    /// Invoke a tool and return the raw result object.
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, BackendError>;

    /// Read a resource and return the raw result object.
    async fn read_resource(&self, uri: &str) -> Result<Value, BackendError>;

    /// Liveness round-trip.
    async fn ping(&self) -> Result<(), BackendError>;

    /// Release the connection. Idempotent.
    async fn close(&self);
}

// ─── Protocol Session ────────────────────────────────────────────────────────

/// A session over a real transport.
pub struct McpSession {
    backend: String,
    transport: Box<dyn Transport>,
    server_info: Option<ServerInfo>,
    instructions: Option<String>,
    call_timeout: Duration,
}

impl McpSession {
    /// Open the transport and perform the initialize handshake.
    ///
    /// The whole sequence is bounded by `init_timeout`. On failure the
    /// transport is closed and any captured stderr is folded into the error.
    pub async fn connect(
        name: &str,
        config: &BackendConfig,
        init_timeout: Duration,
        call_timeout: Duration,
    ) -> Result<Self, BackendError> {
        let transport = match tokio::time::timeout(init_timeout, open_transport(name, config)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(BackendError::InitFailed {
                    name: name.to_string(),
                    reason: format!("connect timed out after {}s", init_timeout.as_secs()),
                })
            }
        };

        let handshake = tokio::time::timeout(init_timeout, initialize(transport.as_ref(), name)).await;
        let init = match handshake {
            Ok(Ok(init)) => init,
            Ok(Err(e)) => {
                let reason = format!("{e}{}", format_stderr_suffix(&transport.diagnostics()));
                transport.close().await;
                return Err(BackendError::InitFailed {
                    name: name.to_string(),
                    reason,
                });
            }
            Err(_) => {
                let reason = format!(
                    "initialization timed out after {}s{}",
                    init_timeout.as_secs(),
                    format_stderr_suffix(&transport.diagnostics())
                );
                transport.close().await;
                return Err(BackendError::InitFailed {
                    name: name.to_string(),
                    reason,
                });
            }
        };

        let server_info = init.server_info;
        tracing::debug!(
            backend = name,
            server_name = server_info.as_ref().and_then(|i| i.name.as_deref()),
            server_version = server_info.as_ref().and_then(|i| i.version.as_deref()),
            protocol = init.protocol_version.as_deref(),
            "session opened"
        );

        Ok(Self {
            backend: name.to_string(),
            transport,
            server_info,
            instructions: init.instructions,
            call_timeout,
        })
    }

    /// Request with the per-call timeout applied.
    async fn rpc(&self, method: &str, params: Option<Value>) -> Result<Value, BackendError> {
        match tokio::time::timeout(self.call_timeout, self.transport.request(method, params)).await {
            Ok(response) => extract_result(response?),
            Err(_) => Err(BackendError::Timeout {
                backend: self.backend.clone(),
                operation: method.to_string(),
                timeout_ms: self.call_timeout.as_millis() as u64,
            }),
        }
    }

    /// Follow `nextCursor` until exhausted, collecting each page with `take`.
    async fn paginate<T, P>(
        &self,
        method: &str,
        take: impl Fn(P) -> (Vec<T>, Option<String>),
    ) -> Result<Vec<T>, BackendError>
    where
        P: serde::de::DeserializeOwned,
    {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let result = self.rpc(method, params).await?;
            let page: P = serde_json::from_value(result).map_err(|e| BackendError::TransportError {
                backend: self.backend.clone(),
                reason: format!("malformed {method} page: {e}"),
            })?;
            let (mut batch, next) = take(page);
            items.append(&mut batch);

            match next {
                Some(next) if !next.is_empty() && Some(&next) != cursor.as_ref() => {
                    cursor = Some(next);
                }
                _ => return Ok(items),
            }
        }

        tracing::warn!(backend = %self.backend, method, "pagination limit reached");
        Ok(items)
    }
}

#[async_trait]
impl BackendSession for McpSession {
    fn backend(&self) -> &str {
        &self.backend
    }

    fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }

    fn instructions(&self) -> Option<&str> {
        self.instructions.as_deref()
    }

    async fn list_tools(&self) -> Result<Vec<ToolDefinition>, BackendError> {
        self.paginate("tools/list", |page: ListToolsPage| (page.tools, page.next_cursor))
            .await
    }

    async fn list_resources(&self) -> Result<Vec<ResourceDefinition>, BackendError> {
        let result = self
            .paginate("resources/list", |page: ListResourcesPage| {
                (page.resources, page.next_cursor)
            })
            .await;
        match result {
            Err(BackendError::ServerError { code, .. }) if code == error_codes::METHOD_NOT_FOUND => {
                Ok(Vec::new())
            }
            other => other,
        }
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, BackendError> {
        let result = self
            .rpc("tools/call", Some(json!({ "name": name, "arguments": arguments })))
            .await?;

        if result.get("isError").and_then(Value::as_bool) == Some(true) {
            return Err(BackendError::ExecutionFailed {
                operation: name.to_string(),
                message: error_text(&result),
            });
        }
        Ok(result)
    }

    async fn read_resource(&self, uri: &str) -> Result<Value, BackendError> {
        self.rpc("resources/read", Some(json!({ "uri": uri }))).await
    }

    async fn ping(&self) -> Result<(), BackendError> {
        self.rpc("ping", None).await.map(|_| ())
    }

    async fn close(&self) {
        self.transport.close().await;
        tracing::debug!(backend = %self.backend, "session closed");
    }
}

// ─── Handshake ───────────────────────────────────────────────────────────────

async fn initialize(transport: &dyn Transport, backend: &str) -> Result<InitializeResult, BackendError> {
    let params = json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": CLIENT_NAME,
            "version": env!("CARGO_PKG_VERSION"),
        },
    });
    let response = transport.request("initialize", Some(params)).await?;
    let result = extract_result(response)?;

    let init: InitializeResult =
        serde_json::from_value(result).map_err(|e| BackendError::InitFailed {
            name: backend.to_string(),
            reason: format!("failed to parse initialize response: {e}"),
        })?;

    transport.notify("notifications/initialized", None).await?;
    Ok(init)
}

/// Join the text blocks of an error result.
fn error_text(result: &Value) -> String {
    let texts: Vec<&str> = result
        .get("content")
        .and_then(Value::as_array)
        .map(|blocks| {
            blocks
                .iter()
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default();

    if texts.is_empty() {
        "backend reported an error without details".to_string()
    } else {
        texts.join("\n")
    }
}

fn format_stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(" | stderr: {}", stderr.trim())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_text_joins_blocks() {
        let result = json!({
            "isError": true,
            "content": [{"type": "text", "text": "no such file"}, {"type": "text", "text": "/tmp/x"}]
        });
        assert_eq!(error_text(&result), "no such file\n/tmp/x");
    }

    #[test]
    fn test_error_text_without_content() {
        assert_eq!(
            error_text(&json!({"isError": true})),
            "backend reported an error without details"
        );
    }

    #[test]
    fn test_format_stderr_suffix() {
        assert_eq!(format_stderr_suffix(""), "");
        assert_eq!(format_stderr_suffix("boom\n"), " | stderr: boom");
    }

    #[tokio::test]
    async fn test_connect_spawn_failure() {
        let config = BackendConfig::stdio("/definitely/not/a/real/binary", &[]);
        let result = McpSession::connect(
            "ghost",
            &config,
            Duration::from_secs(2),
            Duration::from_secs(2),
        )
        .await;
        assert!(matches!(result, Err(BackendError::SpawnFailed { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_connect_times_out_on_silent_backend() {
        let config = BackendConfig::stdio("sleep", &["30"]);
        let result = McpSession::connect(
            "silent",
            &config,
            Duration::from_millis(200),
            Duration::from_secs(1),
        )
        .await;
        match result {
            Err(BackendError::InitFailed { reason, .. }) => assert!(reason.contains("timed out")),
            Err(other) => panic!("expected InitFailed, got {other}"),
            Ok(_) => panic!("expected InitFailed, got a session"),
        }
    }
}
