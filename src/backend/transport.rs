//! JSON-RPC transports to backends.
//!
//! - `StdioTransport`: line-delimited JSON over a child process's stdio
//! - `HttpTransport`: streamable HTTP (POST per message, optional
//!   `Mcp-Session-Id`) or legacy SSE (GET event stream + POST endpoint)
//!
//! Transports only move envelopes. Handshake, timeouts, and result
//! interpretation live in the session layer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

use super::errors::BackendError;
use super::sse::{sse_events, SseEvent};
use super::types::{JsonRpcRequest, JsonRpcResponse};
use crate::config::BackendConfig;

/// Grace period for a child to exit after stdin closes before it is killed.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Stderr kept for diagnostics, in bytes.
const STDERR_TAIL_LIMIT: usize = 2000;

/// Header carrying the streamable-HTTP session identity.
const SESSION_HEADER: &str = "mcp-session-id";

// ─── Request ID Generator ────────────────────────────────────────────────────

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Generate a process-unique request ID.
pub fn next_request_id() -> u64 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

// ─── Transport Trait ─────────────────────────────────────────────────────────

/// A bidirectional JSON-RPC channel to one backend.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and wait for the response with the matching id.
    async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, BackendError>;

    /// Send a notification (no response expected).
    async fn notify(&self, method: &str, params: Option<serde_json::Value>)
        -> Result<(), BackendError>;

    /// Release the channel. Idempotent.
    async fn close(&self);

    /// Diagnostic output captured from the backend (stderr tail for stdio).
    fn diagnostics(&self) -> String {
        String::new()
    }
}

/// Open the transport described by `config`.
pub async fn open_transport(
    name: &str,
    config: &BackendConfig,
) -> Result<Box<dyn Transport>, BackendError> {
    match config.transport {
        crate::config::TransportKind::Stdio => Ok(Box::new(StdioTransport::spawn(name, config)?)),
        crate::config::TransportKind::Http => {
            Ok(Box::new(HttpTransport::connect(name, config).await?))
        }
    }
}

// ─── Stdio ───────────────────────────────────────────────────────────────────

/// JSON-RPC over a child process's stdin/stdout.
pub struct StdioTransport {
    backend: String,
    writer: Mutex<Option<ChildStdin>>,
    reader: Mutex<BufReader<ChildStdout>>,
    child: Mutex<Child>,
    stderr_tail: Arc<std::sync::Mutex<String>>,
}

impl StdioTransport {
    /// Spawn the configured command with piped stdio.
    pub fn spawn(name: &str, config: &BackendConfig) -> Result<Self, BackendError> {
        let command = config.command.as_deref().unwrap_or_default();
        let mut cmd = Command::new(command);
        cmd.args(&config.args);
        for (key, value) in &config.env {
            cmd.env(key, value);
        }
        if let Some(dir) = config.cwd.as_deref() {
            cmd.current_dir(dir);
        }

        #[cfg(target_os = "windows")]
        {
            use std::os::windows::process::CommandExt;
            const CREATE_NO_WINDOW: u32 = 0x08000000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        cmd.stdin(std::process::Stdio::piped());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| BackendError::SpawnFailed {
            name: name.to_string(),
            reason: format!("{e}"),
        })?;

        let stdin = child.stdin.take().ok_or(BackendError::SpawnFailed {
            name: name.to_string(),
            reason: "failed to capture stdin".into(),
        })?;
        let stdout = child.stdout.take().ok_or(BackendError::SpawnFailed {
            name: name.to_string(),
            reason: "failed to capture stdout".into(),
        })?;

        let stderr_tail = Arc::new(std::sync::Mutex::new(String::new()));
        if let Some(stderr) = child.stderr.take() {
            drain_stderr(name.to_string(), stderr, Arc::clone(&stderr_tail));
        }

        tracing::debug!(backend = name, pid = child.id(), command, "spawned backend process");

        Ok(Self {
            backend: name.to_string(),
            writer: Mutex::new(Some(stdin)),
            reader: Mutex::new(BufReader::new(stdout)),
            child: Mutex::new(child),
            stderr_tail,
        })
    }

    fn transport_error(&self, reason: String) -> BackendError {
        BackendError::TransportError {
            backend: self.backend.clone(),
            reason,
        }
    }

    async fn write_line(&self, json: &str) -> Result<(), BackendError> {
        let mut guard = self.writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| self.transport_error("stdin already closed".into()))?;
        writer
            .write_all(json.as_bytes())
            .await
            .map_err(|e| self.transport_error(format!("failed to write to stdin: {e}")))?;
        writer
            .flush()
            .await
            .map_err(|e| self.transport_error(format!("failed to flush stdin: {e}")))
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, BackendError> {
        let id = next_request_id();
        let req = JsonRpcRequest::new(id, method, params);
        let mut json = serde_json::to_string(&req)
            .map_err(|e| self.transport_error(format!("failed to serialize request: {e}")))?;
        json.push('\n');

        // Held across write and read so concurrent requests cannot consume
        // each other's responses.
        let mut reader = self.reader.lock().await;
        self.write_line(&json).await?;

        let mut line_buf = String::new();
        loop {
            line_buf.clear();
            let bytes_read = reader
                .read_line(&mut line_buf)
                .await
                .map_err(|e| self.transport_error(format!("failed to read from stdout: {e}")))?;

            if bytes_read == 0 {
                return Err(self.transport_error(
                    "backend stdout closed (process may have exited)".into(),
                ));
            }

            let trimmed = line_buf.trim();
            if trimmed.is_empty() {
                continue;
            }

            // Non-JSON lines are backend log output; other ids are
            // server-initiated traffic. Both are skipped.
            match serde_json::from_str::<JsonRpcResponse>(trimmed) {
                Ok(resp) if resp.id == id => return Ok(resp),
                Ok(_) | Err(_) => {
                    tracing::trace!(backend = %self.backend, line = trimmed, "skipping stdout line");
                    continue;
                }
            }
        }
    }

    async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), BackendError> {
        let notification = notification_body(method, params);
        let mut json = serde_json::to_string(&notification)
            .map_err(|e| self.transport_error(format!("failed to serialize notification: {e}")))?;
        json.push('\n');
        self.write_line(&json).await
    }

    async fn close(&self) {
        // Closing stdin is the shutdown signal for stdio servers.
        drop(self.writer.lock().await.take());

        let mut child = self.child.lock().await;
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(backend = %self.backend, %status, "backend process exited");
            }
            _ => {
                tracing::debug!(backend = %self.backend, "backend did not exit in time, killing");
                let _ = child.kill().await;
            }
        }
    }

    fn diagnostics(&self) -> String {
        self.stderr_tail
            .lock()
            .map(|tail| tail.trim().to_string())
            .unwrap_or_default()
    }
}

/// Keep reading stderr so the pipe never fills, retaining the last
/// `STDERR_TAIL_LIMIT` bytes for error messages.
fn drain_stderr(
    backend: String,
    stderr: tokio::process::ChildStderr,
    tail: Arc<std::sync::Mutex<String>>,
) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(backend = %backend, stderr = %line, "backend stderr");
            if let Ok(mut buf) = tail.lock() {
                buf.push_str(&line);
                buf.push('\n');
                if buf.len() > STDERR_TAIL_LIMIT {
                    let mut cut = buf.len() - STDERR_TAIL_LIMIT;
                    while !buf.is_char_boundary(cut) {
                        cut += 1;
                    }
                    buf.drain(..cut);
                }
            }
        }
    });
}

// ─── HTTP ────────────────────────────────────────────────────────────────────

/// Which HTTP wire protocol a backend speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpFlavor {
    /// One POST per message; responses as JSON or an SSE body.
    Streamable,
    /// Long-lived GET event stream plus a POST endpoint it announces.
    Sse,
}

impl HttpFlavor {
    /// URLs whose last path segment is `sse` use the legacy flavour.
    pub fn detect(url: &str) -> Self {
        let path = url.split(['?', '#']).next().unwrap_or_default();
        if path.trim_end_matches('/').ends_with("/sse") {
            Self::Sse
        } else {
            Self::Streamable
        }
    }
}

type PendingMap = Arc<std::sync::Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

/// State for the legacy SSE flavour.
struct SseChannel {
    post_url: String,
    pending: PendingMap,
    reader: JoinHandle<()>,
}

/// JSON-RPC over HTTP.
pub struct HttpTransport {
    backend: String,
    client: reqwest::Client,
    url: String,
    headers: HeaderMap,
    flavor: HttpFlavor,
    session_id: Mutex<Option<String>>,
    sse: Option<SseChannel>,
}

impl HttpTransport {
    /// Prepare the client. For the SSE flavour this also opens the event
    /// stream and waits for the `endpoint` announcement.
    pub async fn connect(name: &str, config: &BackendConfig) -> Result<Self, BackendError> {
        let url = config.url.clone().unwrap_or_default();
        let headers = build_headers(name, &config.headers)?;
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| BackendError::InitFailed {
                name: name.to_string(),
                reason: format!("failed to build http client: {e}"),
            })?;
        let flavor = HttpFlavor::detect(&url);

        let sse = match flavor {
            HttpFlavor::Streamable => None,
            HttpFlavor::Sse => Some(open_sse_channel(name, &client, &url, &headers).await?),
        };

        tracing::debug!(backend = name, url = %url, ?flavor, "http transport ready");

        Ok(Self {
            backend: name.to_string(),
            client,
            url,
            headers,
            flavor,
            session_id: Mutex::new(None),
            sse,
        })
    }

    pub fn flavor(&self) -> HttpFlavor {
        self.flavor
    }

    fn transport_error(&self, reason: String) -> BackendError {
        BackendError::TransportError {
            backend: self.backend.clone(),
            reason,
        }
    }

    /// POST a body, attaching the session id if one has been assigned.
    async fn post(&self, url: &str, body: &serde_json::Value) -> Result<reqwest::Response, BackendError> {
        let mut request = self
            .client
            .post(url)
            .headers(self.headers.clone())
            .header(ACCEPT, "application/json, text/event-stream")
            .json(body);
        if let Some(session) = self.session_id.lock().await.as_deref() {
            request = request.header(SESSION_HEADER, session);
        }

        let response = request
            .send()
            .await
            .map_err(|e| self.transport_error(format!("POST {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(self.transport_error(format!("HTTP {status}: {}", truncate(&body_text, 500))));
        }
        Ok(response)
    }

    async fn request_streamable(
        &self,
        id: u64,
        body: serde_json::Value,
    ) -> Result<JsonRpcResponse, BackendError> {
        let response = self.post(&self.url, &body).await?;

        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            *self.session_id.lock().await = Some(session.to_string());
        }

        let is_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));

        if !is_stream {
            return response
                .json::<JsonRpcResponse>()
                .await
                .map_err(|e| self.transport_error(format!("invalid JSON-RPC response: {e}")));
        }

        let mut events = Box::pin(sse_events(self.backend.clone(), response));
        while let Some(event) = events.next().await {
            let event = event?;
            if let Some(resp) = response_for(&event, id) {
                return Ok(resp);
            }
        }
        Err(self.transport_error("event stream ended before a response arrived".into()))
    }

    async fn request_sse(
        &self,
        channel: &SseChannel,
        id: u64,
        body: serde_json::Value,
    ) -> Result<JsonRpcResponse, BackendError> {
        let (tx, rx) = oneshot::channel();
        if let Ok(mut pending) = channel.pending.lock() {
            pending.insert(id, tx);
        }

        if let Err(e) = self.post(&channel.post_url, &body).await {
            if let Ok(mut pending) = channel.pending.lock() {
                pending.remove(&id);
            }
            return Err(e);
        }

        rx.await
            .map_err(|_| self.transport_error("event stream closed before a response arrived".into()))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, BackendError> {
        let id = next_request_id();
        let body = serde_json::to_value(JsonRpcRequest::new(id, method, params))
            .map_err(|e| self.transport_error(format!("failed to serialize request: {e}")))?;

        match &self.sse {
            Some(channel) => self.request_sse(channel, id, body).await,
            None => self.request_streamable(id, body).await,
        }
    }

    async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), BackendError> {
        let body = notification_body(method, params);
        let url = self
            .sse
            .as_ref()
            .map_or(self.url.as_str(), |channel| channel.post_url.as_str());
        self.post(url, &body).await.map(|_| ())
    }

    async fn close(&self) {
        if let Some(channel) = &self.sse {
            channel.reader.abort();
            if let Ok(mut pending) = channel.pending.lock() {
                pending.clear();
            }
            return;
        }

        let session = self.session_id.lock().await.take();
        if let Some(session) = session {
            let result = self
                .client
                .delete(&self.url)
                .headers(self.headers.clone())
                .header(SESSION_HEADER, &session)
                .send()
                .await;
            if let Err(e) = result {
                tracing::debug!(backend = %self.backend, error = %e, "session DELETE failed");
            }
        }
    }
}

/// Open the legacy SSE stream and wait for the POST endpoint.
async fn open_sse_channel(
    name: &str,
    client: &reqwest::Client,
    url: &str,
    headers: &HeaderMap,
) -> Result<SseChannel, BackendError> {
    let init_failed = |reason: String| BackendError::InitFailed {
        name: name.to_string(),
        reason,
    };

    let response = client
        .get(url)
        .headers(headers.clone())
        .header(ACCEPT, "text/event-stream")
        .send()
        .await
        .map_err(|e| init_failed(format!("GET {url} failed: {e}")))?;
    if !response.status().is_success() {
        return Err(init_failed(format!("GET {url} returned HTTP {}", response.status())));
    }

    let base = reqwest::Url::parse(url).map_err(|e| init_failed(format!("bad url: {e}")))?;
    let pending: PendingMap = Arc::new(std::sync::Mutex::new(HashMap::new()));
    let (endpoint_tx, endpoint_rx) = oneshot::channel::<String>();

    let reader = {
        let pending = Arc::clone(&pending);
        let backend = name.to_string();
        let mut events = Box::pin(sse_events(backend.clone(), response));
        tokio::spawn(async move {
            let mut endpoint_tx = Some(endpoint_tx);
            while let Some(event) = events.next().await {
                let event = match event {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::warn!(backend = %backend, error = %e, "sse stream failed");
                        break;
                    }
                };
                if event.event.as_deref() == Some("endpoint") {
                    if let Some(tx) = endpoint_tx.take() {
                        let _ = tx.send(event.data.trim().to_string());
                    }
                    continue;
                }
                if !event.is_message() {
                    continue;
                }
                let Ok(resp) = serde_json::from_str::<JsonRpcResponse>(&event.data) else {
                    continue;
                };
                let waiter = pending.lock().ok().and_then(|mut p| p.remove(&resp.id));
                if let Some(tx) = waiter {
                    let _ = tx.send(resp);
                }
            }
            // Dropping the senders fails every outstanding request.
            if let Ok(mut p) = pending.lock() {
                p.clear();
            }
        })
    };

    let endpoint = endpoint_rx
        .await
        .map_err(|_| init_failed("event stream closed before announcing an endpoint".into()))?;
    let post_url = base
        .join(&endpoint)
        .map_err(|e| init_failed(format!("bad endpoint '{endpoint}': {e}")))?;

    Ok(SseChannel {
        post_url: post_url.to_string(),
        pending,
        reader,
    })
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn notification_body(method: &str, params: Option<serde_json::Value>) -> serde_json::Value {
    let mut body = serde_json::json!({
        "jsonrpc": "2.0",
        "method": method,
    });
    if let Some(params) = params {
        body["params"] = params;
    }
    body
}

fn response_for(event: &SseEvent, id: u64) -> Option<JsonRpcResponse> {
    if !event.is_message() {
        return None;
    }
    serde_json::from_str::<JsonRpcResponse>(&event.data)
        .ok()
        .filter(|resp| resp.id == id)
}

fn build_headers(name: &str, headers: &HashMap<String, String>) -> Result<HeaderMap, BackendError> {
    let mut map = HeaderMap::new();
    for (key, value) in headers {
        let header_name = HeaderName::from_bytes(key.as_bytes()).map_err(|e| {
            BackendError::InitFailed {
                name: name.to_string(),
                reason: format!("invalid header name '{key}': {e}"),
            }
        })?;
        let header_value = HeaderValue::from_str(value).map_err(|e| BackendError::InitFailed {
            name: name.to_string(),
            reason: format!("invalid value for header '{key}': {e}"),
        })?;
        map.insert(header_name, header_value);
    }
    Ok(map)
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars).collect();
    cut.push_str("...");
    cut
}

/// Extract the result from a JSON-RPC response, converting errors.
pub fn extract_result(response: JsonRpcResponse) -> Result<serde_json::Value, BackendError> {
    if let Some(err) = response.error {
        return Err(BackendError::ServerError {
            code: err.code,
            message: err.message,
            data: err.data,
        });
    }

    response.result.ok_or(BackendError::ServerError {
        code: super::types::error_codes::INTERNAL_ERROR,
        message: "response missing both result and error".into(),
        data: None,
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
