//! Dispatcher: the three gateway operations.
//!
//! - `describe("backend")` / `describe("backend.operation")`
//! - `call("backend.operation", arguments)`
//! - `read(backend, uri)`
//!
//! Lookups go to the Capability Cache, invocations through the Connection
//! Manager. Every failure comes back as a [`GatewayError`]; nothing here
//! panics on caller input.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Map, Value};

use super::content::{extract_call_result, extract_read_result, CallOutcome};
use super::context::GatewayContext;
use super::errors::GatewayError;
use super::validation::{arguments_object, validate_arguments};
use crate::cache::{truncate_chars, BackendSnapshot, OperationInfo};

const INSTRUCTIONS_MAX: usize = 300;

/// The operations exposed to callers, independent of their configured names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayOperation {
    Describe,
    Call,
    Read,
}

/// Result of [`Dispatcher::dispatch`].
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutput {
    Outcome(CallOutcome),
    /// Resource contents from `read`.
    Resource(Value),
}

pub struct Dispatcher {
    context: Arc<GatewayContext>,
    routes: HashMap<String, GatewayOperation>,
}

impl Dispatcher {
    /// Build the name → operation table from the context's config.
    pub fn new(context: Arc<GatewayContext>) -> Self {
        let names = context.config().operation_names.clone();
        let routes = HashMap::from([
            (names.describe, GatewayOperation::Describe),
            (names.call, GatewayOperation::Call),
            (names.read, GatewayOperation::Read),
        ]);
        Self { context, routes }
    }

    pub fn context(&self) -> &Arc<GatewayContext> {
        &self.context
    }

    /// Exposed name of `operation`.
    pub fn name_of(&self, operation: GatewayOperation) -> &str {
        self.routes
            .iter()
            .find(|(_, op)| **op == operation)
            .map(|(name, _)| name.as_str())
            .unwrap_or_default()
    }

    /// Route a front-end invocation by operation name.
    pub async fn dispatch(&self, name: &str, params: &Value) -> Result<DispatchOutput, GatewayError> {
        let Some(operation) = self.routes.get(name).copied() else {
            let mut available: Vec<&String> = self.routes.keys().collect();
            available.sort();
            return Err(GatewayError::InvalidRequest {
                reason: format!("unknown operation '{name}'. Available: {available:?}"),
            });
        };

        match operation {
            GatewayOperation::Describe => {
                let method = string_param(params, "method")?;
                self.describe(method).map(DispatchOutput::Outcome)
            }
            GatewayOperation::Call => {
                let method = string_param(params, "method")?;
                self.call(method, params.get("arguments"))
                    .await
                    .map(DispatchOutput::Outcome)
            }
            GatewayOperation::Read => {
                let backend = string_param(params, "backend")?;
                let uri = string_param(params, "uri")?;
                self.read(backend, uri).await.map(DispatchOutput::Resource)
            }
        }
    }

    // ── describe ────────────────────────────────────────────────────────

    /// Operations of a backend, or one operation's full schema.
    pub fn describe(&self, method: &str) -> Result<CallOutcome, GatewayError> {
        let method = method.trim();
        let (backend, operation) = match method.split_once('.') {
            Some((backend, operation)) => (backend, Some(operation)),
            None => (method, None),
        };
        if backend.is_empty() || operation.is_some_and(str::is_empty) {
            return Err(GatewayError::InvalidMethod {
                method: method.to_string(),
                reason: "expected 'backend' or 'backend.operation'".into(),
            });
        }

        let snapshot = self.require_backend(backend)?;
        let raw = match operation {
            Some(operation) => {
                let info = self.require_operation(&snapshot, operation)?;
                json!({
                    "backend": backend,
                    "name": info.name,
                    "description": info.description,
                    "schema": self.render_schema(info),
                })
            }
            None => self.describe_backend(&snapshot),
        };

        Ok(CallOutcome::structured(raw, &self.context.response_compressor()))
    }

    fn describe_backend(&self, snapshot: &BackendSnapshot) -> Value {
        let backend = snapshot.info.name.as_str();
        let operations: Vec<Value> = snapshot
            .operations
            .iter()
            .filter(|op| !self.context.is_operation_disabled(backend, &op.name))
            .map(|op| {
                json!({
                    "name": op.name,
                    "description": op.description,
                    "schema": self.render_schema(op),
                })
            })
            .collect();

        let mut value = json!({
            "backend": backend,
            "server": snapshot.info.server_name,
            "version": snapshot.info.version,
            "operations": operations,
        });
        if let Some(obj) = value.as_object_mut() {
            if let Some(instructions) = snapshot.info.instructions.as_deref().filter(|s| !s.is_empty()) {
                obj.insert(
                    "instructions".into(),
                    json!(truncate_chars(instructions, INSTRUCTIONS_MAX)),
                );
            }
            if !snapshot.resources.is_empty() {
                let resources: Vec<Value> = snapshot
                    .resources
                    .iter()
                    .map(|r| {
                        json!({
                            "uri": r.uri,
                            "name": r.name,
                            "mime_type": r.mime_type,
                            "description": r.description,
                        })
                    })
                    .collect();
                obj.insert("resources".into(), Value::Array(resources));
            }
        }
        value
    }

    /// Compact notation, or the raw schema when schema compression is off.
    fn render_schema(&self, op: &OperationInfo) -> Value {
        if self.context.config().schema_compression_enabled {
            Value::String(self.context.schema_compressor().compress(&op.input_schema))
        } else {
            op.input_schema.clone()
        }
    }

    // ── call ────────────────────────────────────────────────────────────

    /// Validate, invoke, and compress. Arguments that fail validation never
    /// reach the backend.
    pub async fn call(&self, method: &str, arguments: Option<&Value>) -> Result<CallOutcome, GatewayError> {
        let (backend, operation) = parse_call_method(method)?;
        let snapshot = self.require_backend(backend)?;
        let info = self.require_operation(&snapshot, operation)?.clone();

        let args = arguments_object(arguments)
            .and_then(|args| validate_arguments(&args, &info.input_schema).map(|()| args))
            .map_err(|message| {
                tracing::debug!(backend, operation, reason = %message, "arguments rejected");
                GatewayError::Validation {
                    message,
                    compact_schema: self.context.schema_compressor().compress(&info.input_schema),
                    schema: info.input_schema.clone(),
                }
            })?;

        let timeout = self.context.config().call_timeout();
        let started = Instant::now();
        let invoke = async {
            let manager = self.context.manager();
            let mut session = manager
                .acquire(backend)
                .await
                .map_err(|e| GatewayError::from_backend(backend, operation, e))?;
            let result = session.call_tool(operation, Value::Object(args)).await;
            session.track(&result);
            session.release().await;
            result.map_err(|e| GatewayError::from_backend(backend, operation, e))
        };

        let result = match tokio::time::timeout(timeout, invoke).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout {
                backend: backend.to_string(),
                operation: operation.to_string(),
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        };
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let raw = result.map_err(|e| {
            tracing::warn!(backend, operation, elapsed_ms, error = %e, "call failed");
            e
        })?;

        let outcome = CallOutcome::from_extracted(
            extract_call_result(&raw),
            &self.context.response_compressor(),
        );
        tracing::info!(
            backend,
            operation,
            elapsed_ms,
            format = outcome.format(),
            "call completed"
        );
        Ok(outcome)
    }

    // ── read ────────────────────────────────────────────────────────────

    /// Fetch a cached resource's live contents.
    pub async fn read(&self, backend: &str, uri: &str) -> Result<Value, GatewayError> {
        let snapshot = self.require_backend(backend)?;
        let not_found = || GatewayError::ResourceNotFound {
            backend: backend.to_string(),
            uri: uri.to_string(),
        };
        if snapshot.resource(uri).is_none() {
            return Err(not_found());
        }

        let timeout = self.context.config().call_timeout();
        let fetch = async {
            let mut session = self
                .context
                .manager()
                .acquire(backend)
                .await
                .map_err(|e| GatewayError::from_read(backend, uri, e))?;
            let result = session.read_resource(uri).await;
            session.track(&result);
            session.release().await;
            result.map_err(|e| GatewayError::from_read(backend, uri, e))
        };

        let raw = match tokio::time::timeout(timeout, fetch).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout {
                backend: backend.to_string(),
                operation: "resources/read".to_string(),
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
        .map_err(|e| {
            tracing::warn!(backend, uri, error = %e, "resource read failed");
            e
        })?;

        extract_read_result(&raw).ok_or_else(not_found)
    }

    // ── lookups ─────────────────────────────────────────────────────────

    fn require_backend(&self, backend: &str) -> Result<Arc<BackendSnapshot>, GatewayError> {
        self.context
            .cache()
            .snapshot(backend)
            .ok_or_else(|| GatewayError::BackendNotFound {
                backend: backend.to_string(),
                available: self.context.cache().backends(),
            })
    }

    fn require_operation<'a>(
        &self,
        snapshot: &'a BackendSnapshot,
        operation: &str,
    ) -> Result<&'a OperationInfo, GatewayError> {
        let backend = snapshot.info.name.as_str();
        snapshot
            .operation(operation)
            .filter(|_| !self.context.is_operation_disabled(backend, operation))
            .ok_or_else(|| GatewayError::OperationNotFound {
                backend: backend.to_string(),
                operation: operation.to_string(),
                available: snapshot
                    .operations
                    .iter()
                    .filter(|op| !self.context.is_operation_disabled(backend, &op.name))
                    .map(|op| op.name.clone())
                    .collect(),
            })
    }
}

/// Split `backend.operation` on the first dot.
fn parse_call_method(method: &str) -> Result<(&str, &str), GatewayError> {
    match method.trim().split_once('.') {
        Some((backend, operation)) if !backend.is_empty() && !operation.is_empty() => {
            Ok((backend, operation))
        }
        _ => Err(GatewayError::InvalidMethod {
            method: method.to_string(),
            reason: "expected 'backend.operation'".into(),
        }),
    }
}

fn string_param<'a>(params: &'a Value, key: &str) -> Result<&'a str, GatewayError> {
    params
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::InvalidRequest {
            reason: format!("missing string parameter '{key}'"),
        })
}

/// Arguments object for a `call` dispatch.
pub fn call_params(method: &str, arguments: Map<String, Value>) -> Value {
    json!({"method": method, "arguments": arguments})
}

// ─── Tests ───────────────────────────────────────────────────────────────────
