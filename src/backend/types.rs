//! Wire types shared by all backend transports.
//!
//! JSON-RPC 2.0 envelopes plus the handful of protocol payloads the gateway
//! reads during discovery (`initialize`, `tools/list`, `resources/list`).

use serde::{Deserialize, Serialize};

/// Protocol revision announced in `initialize`.
pub const PROTOCOL_VERSION: &str = "2025-03-26";

/// Client name announced in `initialize`.
pub const CLIENT_NAME: &str = "switchboard";

// ─── JSON-RPC 2.0 ───────────────────────────────────────────────────────────

/// JSON-RPC 2.0 request message.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: &str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC 2.0 response message (success or error).
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[allow(dead_code)]
    pub jsonrpc: String,
    pub id: u64,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

// ─── Protocol Payloads ───────────────────────────────────────────────────────

/// Backend identity reported by `initialize`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

/// `initialize` response payload.
#[derive(Debug, Clone, Deserialize)]
pub struct InitializeResult {
    #[serde(default, alias = "protocolVersion")]
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub capabilities: serde_json::Value,
    #[serde(default, alias = "serverInfo")]
    pub server_info: Option<ServerInfo>,
    #[serde(default)]
    pub instructions: Option<String>,
}

/// A tool as listed by a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "empty_object", rename = "inputSchema", alias = "input_schema")]
    pub input_schema: serde_json::Value,
}

/// A resource as listed by a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDefinition {
    pub uri: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "mimeType", alias = "mime_type")]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
}

/// One page of `tools/list`.
#[derive(Debug, Clone, Deserialize)]
pub struct ListToolsPage {
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
    #[serde(default, rename = "nextCursor")]
    pub next_cursor: Option<String>,
}

/// One page of `resources/list`.
#[derive(Debug, Clone, Deserialize)]
pub struct ListResourcesPage {
    #[serde(default)]
    pub resources: Vec<ResourceDefinition>,
    #[serde(default, rename = "nextCursor")]
    pub next_cursor: Option<String>,
}

fn empty_object() -> serde_json::Value {
    serde_json::json!({})
}

// ─── Content Blocks ──────────────────────────────────────────────────────────

/// Whether `value` is a protocol content block (`{"type": "text", "text": ..}`,
/// `{"type": "image", "data": .., "mimeType": ..}`, ...).
pub fn is_content_block(value: &serde_json::Value) -> bool {
    let Some(obj) = value.as_object() else {
        return false;
    };
    match obj.get("type").and_then(serde_json::Value::as_str) {
        Some("text") => obj.get("text").is_some_and(serde_json::Value::is_string),
        Some("image") | Some("audio") => obj.contains_key("data"),
        Some("resource") => obj.contains_key("resource"),
        Some("resource_link") => obj.contains_key("uri"),
        _ => false,
    }
}

/// Content blocks other than plain text.
pub fn is_multimodal_block(value: &serde_json::Value) -> bool {
    is_content_block(value) && value.get("type").and_then(serde_json::Value::as_str) != Some("text")
}

// ─── Standard Error Codes ────────────────────────────────────────────────────

/// Well-known JSON-RPC error codes.
pub mod error_codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
}

// ─── Tests ───────────────────────────────────────────────────────────────────
