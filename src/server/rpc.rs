//! JSON-RPC handler for the gateway's own callers.
//!
//! Speaks the same capability protocol the backends speak: `initialize`,
//! `ping`, `tools/list` and `tools/call`. The three listed tools are the
//! dispatcher's describe/call/read operations under their configured names.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::backend::types::{error_codes, PROTOCOL_VERSION};
use crate::gateway::{CallOutcome, DispatchOutput, Dispatcher, GatewayError, GatewayOperation};

/// Name reported in `serverInfo`.
pub const SERVER_NAME: &str = "switchboard";

/// Inbound JSON-RPC message. Requests without an `id` are notifications.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

impl RpcRequest {
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

pub fn success(id: Value, result: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "result": result})
}

pub fn failure(id: Value, code: i32, message: &str) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}})
}

pub struct RpcHandler {
    dispatcher: Arc<Dispatcher>,
}

impl RpcHandler {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Handle one raw message. `None` means nothing should be sent back.
    pub async fn handle_value(&self, message: Value) -> Option<Value> {
        let id = message.get("id").cloned();
        match serde_json::from_value::<RpcRequest>(message) {
            Ok(request) => self.handle(request).await,
            Err(e) => id.map(|id| failure(id, error_codes::INVALID_REQUEST, &e.to_string())),
        }
    }

    pub async fn handle(&self, request: RpcRequest) -> Option<Value> {
        if request.is_notification() {
            tracing::debug!(method = %request.method, "notification received");
            return None;
        }
        let id = request.id.unwrap_or(Value::Null);

        let response = match request.method.as_str() {
            "initialize" => success(id, self.initialize_result()),
            "ping" => success(id, json!({})),
            "tools/list" => success(id, json!({"tools": self.list_tools()})),
            "tools/call" => match self.call_tool(request.params.as_ref()).await {
                Ok(result) => success(id, result),
                Err(message) => failure(id, error_codes::INVALID_PARAMS, &message),
            },
            other => {
                tracing::debug!(method = other, "unknown method");
                failure(id, error_codes::METHOD_NOT_FOUND, &format!("Method not found: {other}"))
            }
        };
        Some(response)
    }

    fn initialize_result(&self) -> Value {
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {"tools": {"listChanged": false}},
            "serverInfo": {"name": SERVER_NAME, "version": env!("CARGO_PKG_VERSION")},
        })
    }

    /// Tool definitions for describe, call and read.
    pub fn list_tools(&self) -> Vec<Value> {
        let context = self.dispatcher.context();
        let name = |op| self.dispatcher.name_of(op).to_string();

        let describe_desc = format!(
            "Inspect backends and their operations. Pass 'backend' to list its operations, \
             or 'backend.operation' for one operation's input schema.\n\n{}",
            context.tools_overview()
        );
        let call_desc = format!(
            "Invoke an operation as 'backend.operation' with its arguments. \
             Use {} first to get the argument schema.",
            name(GatewayOperation::Describe)
        );
        let read_desc = format!(
            "Read a resource from a backend by URI.\n\n{}",
            context.resources_overview()
        );

        vec![
            json!({
                "name": name(GatewayOperation::Describe),
                "description": describe_desc,
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "method": {"type": "string", "description": "'backend' or 'backend.operation'"}
                    },
                    "required": ["method"]
                }
            }),
            json!({
                "name": name(GatewayOperation::Call),
                "description": call_desc,
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "method": {"type": "string", "description": "'backend.operation'"},
                        "arguments": {"type": "object", "description": "Operation arguments"}
                    },
                    "required": ["method"]
                }
            }),
            json!({
                "name": name(GatewayOperation::Read),
                "description": read_desc,
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "backend": {"type": "string"},
                        "uri": {"type": "string"}
                    },
                    "required": ["backend", "uri"]
                }
            }),
        ]
    }

    /// `tools/call`. Gateway failures come back as `isError` results; only
    /// a malformed request is a protocol error.
    async fn call_tool(&self, params: Option<&Value>) -> Result<Value, String> {
        let params = params.ok_or("tools/call requires params")?;
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or("tools/call requires a string 'name'")?;
        let arguments = params
            .get("arguments")
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()));

        let result = match self.dispatcher.dispatch(name, &arguments).await {
            Ok(output) => self.render_output(output),
            Err(e) => self.render_error(&e),
        };
        Ok(result)
    }

    fn render_output(&self, output: DispatchOutput) -> Value {
        match output {
            DispatchOutput::Outcome(CallOutcome::Structured { compact, raw, .. }) => {
                let mut result = json!({"content": [text_block(compact)]});
                if self.dispatcher.context().config().include_structured_content {
                    let structured = match raw {
                        Value::Object(_) => raw,
                        other => json!({"result": other}),
                    };
                    result["structuredContent"] = structured;
                }
                result
            }
            DispatchOutput::Outcome(CallOutcome::Multimodal { items }) => json!({"content": items}),
            DispatchOutput::Resource(Value::Array(parts)) => {
                json!({"content": parts.into_iter().map(resource_block).collect::<Vec<_>>()})
            }
            DispatchOutput::Resource(part) => json!({"content": [resource_block(part)]}),
        }
    }

    fn render_error(&self, error: &GatewayError) -> Value {
        let (text, _) = self
            .dispatcher
            .context()
            .response_compressor()
            .compress(&error.to_value());
        json!({"content": [text_block(text)], "isError": true})
    }
}

fn text_block(text: String) -> Value {
    json!({"type": "text", "text": text})
}

/// A read part as a content block: strings as text, blobs as embedded
/// resources.
fn resource_block(part: Value) -> Value {
    match part {
        Value::String(text) => text_block(text),
        blob => json!({"type": "resource", "resource": blob}),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::{text_result, FakeBackend, FakeFactory};
    use crate::backend::SessionFactory;
    use crate::config::{BackendConfig, GatewayConfig};
    use crate::gateway::GatewayContext;

    async fn handler_with(config: GatewayConfig) -> RpcHandler {
        let backend = FakeBackend::default()
            .with_tool(
                "echo",
                json!({"type": "object", "properties": {"text": {"type": "string"}}, "required": ["text"]}),
            )
            .with_tool("rows", json!({}))
            .with_resource(
                "file:///logo.png",
                Some("image/png"),
                json!({"contents": [{"uri": "file:///logo.png", "mimeType": "image/png", "blob": "iVBOR"}]}),
            )
            .with_handler(|name, args| match name {
                "echo" => Ok(text_result(args["text"].as_str().unwrap_or(""))),
                _ => Ok(text_result(r#"[{"id":1},{"id":2}]"#)),
            });
        let factory: Arc<dyn SessionFactory> = Arc::new(FakeFactory::new().with_backend("fs", backend));
        let context = GatewayContext::initialize(config, factory).await;
        RpcHandler::new(Arc::new(Dispatcher::new(context)))
    }

    fn config() -> GatewayConfig {
        let mut config = GatewayConfig {
            health_check_enabled: false,
            ..GatewayConfig::default()
        };
        config
            .backends
            .insert("fs".into(), BackendConfig::stdio("fake", &[]));
        config
    }

    async fn request(handler: &RpcHandler, method: &str, params: Value) -> Value {
        handler
            .handle_value(json!({"jsonrpc": "2.0", "id": 7, "method": method, "params": params}))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_initialize_and_ping() {
        let handler = handler_with(config()).await;
        let response = request(&handler, "initialize", json!({})).await;
        assert_eq!(response["id"], 7);
        assert_eq!(response["result"]["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(response["result"]["serverInfo"]["name"], SERVER_NAME);

        let pong = request(&handler, "ping", json!({})).await;
        assert_eq!(pong["result"], json!({}));
    }

    #[tokio::test]
    async fn test_notifications_get_no_response() {
        let handler = handler_with(config()).await;
        let response = handler
            .handle_value(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
            .await;
        assert!(response.is_none());
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let handler = handler_with(config()).await;
        let response = request(&handler, "prompts/list", json!({})).await;
        assert_eq!(response["error"]["code"], error_codes::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_tools_list_embeds_overview() {
        let handler = handler_with(config()).await;
        let response = request(&handler, "tools/list", json!({})).await;
        let tools = response["result"]["tools"].as_array().unwrap();
        let names: Vec<&str> = tools.iter().filter_map(|t| t["name"].as_str()).collect();
        assert_eq!(names, vec!["describe", "call", "read"]);
        assert!(tools[0]["description"].as_str().unwrap().contains("echo"));
        assert!(tools[2]["description"].as_str().unwrap().contains("file:///logo.png"));
    }

    #[tokio::test]
    async fn test_call_returns_text_and_structured_content() {
        let handler = handler_with(config()).await;
        let response = request(
            &handler,
            "tools/call",
            json!({"name": "call", "arguments": {"method": "fs.rows"}}),
        )
        .await;
        let result = &response["result"];
        assert_eq!(result["content"][0]["text"], "[2]{id}:\n  1\n  2");
        assert_eq!(result["structuredContent"], json!({"result": [{"id": 1}, {"id": 2}]}));
        assert!(result.get("isError").is_none());
    }

    #[tokio::test]
    async fn test_structured_content_can_be_disabled() {
        let mut cfg = config();
        cfg.include_structured_content = false;
        let handler = handler_with(cfg).await;
        let response = request(
            &handler,
            "tools/call",
            json!({"name": "call", "arguments": {"method": "fs.echo", "arguments": {"text": "hi"}}}),
        )
        .await;
        assert_eq!(response["result"]["content"][0]["text"], "hi");
        assert!(response["result"].get("structuredContent").is_none());
    }

    #[tokio::test]
    async fn test_gateway_errors_become_error_results() {
        let handler = handler_with(config()).await;
        let response = request(
            &handler,
            "tools/call",
            json!({"name": "call", "arguments": {"method": "fs.echo", "arguments": {}}}),
        )
        .await;
        let result = &response["result"];
        assert_eq!(result["isError"], true);
        let text = result["content"][0]["text"].as_str().unwrap();
        assert!(text.contains("VALIDATION_ERROR"));
        assert!(text.contains("Missing required argument"));
    }

    #[tokio::test]
    async fn test_read_blob_becomes_resource_block() {
        let handler = handler_with(config()).await;
        let response = request(
            &handler,
            "tools/call",
            json!({"name": "read", "arguments": {"backend": "fs", "uri": "file:///logo.png"}}),
        )
        .await;
        let block = &response["result"]["content"][0];
        assert_eq!(block["type"], "resource");
        assert_eq!(block["resource"]["blob"], "iVBOR");
    }

    #[tokio::test]
    async fn test_tools_call_without_name_is_protocol_error() {
        let handler = handler_with(config()).await;
        let response = request(&handler, "tools/call", json!({"arguments": {}})).await;
        assert_eq!(response["error"]["code"], error_codes::INVALID_PARAMS);
    }
}
