//! Scripted in-process backends for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::errors::BackendError;
use super::factory::SessionFactory;
use super::session::BackendSession;
use super::types::{ResourceDefinition, ServerInfo, ToolDefinition};
use crate::config::BackendConfig;

pub type CallHandler = Arc<dyn Fn(&str, &Value) -> Result<Value, BackendError> + Send + Sync>;

/// `{"content": [{"type": "text", "text": …}]}`
pub fn text_result(text: &str) -> Value {
    json!({ "content": [{ "type": "text", "text": text }] })
}

pub fn tool(name: &str, schema: Value) -> ToolDefinition {
    ToolDefinition {
        name: name.to_string(),
        description: Some(format!("{name} tool")),
        input_schema: schema,
    }
}

/// Behaviour and counters for one fake backend.
pub struct FakeBackend {
    tools: Mutex<Vec<ToolDefinition>>,
    resources: Mutex<Vec<(ResourceDefinition, Value)>>,
    handler: CallHandler,
    call_delay: Duration,
    pub fail_connect: AtomicBool,
    pub fail_ping: AtomicBool,
    pub hang_ping: AtomicBool,
    pub fail_list: AtomicBool,
    pub connects: AtomicUsize,
    pub closes: AtomicUsize,
    pub calls: AtomicUsize,
    pub pings: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    call_sessions: Mutex<Vec<u64>>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self {
            tools: Mutex::new(Vec::new()),
            resources: Mutex::new(Vec::new()),
            handler: Arc::new(|_, args| Ok(text_result(&args.to_string()))),
            call_delay: Duration::ZERO,
            fail_connect: AtomicBool::new(false),
            fail_ping: AtomicBool::new(false),
            hang_ping: AtomicBool::new(false),
            fail_list: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            pings: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            call_sessions: Mutex::new(Vec::new()),
        }
    }
}

impl FakeBackend {
    pub fn with_tool(self, name: &str, schema: Value) -> Self {
        self.tools.lock().unwrap().push(tool(name, schema));
        self
    }

    pub fn with_resource(self, uri: &str, mime: Option<&str>, contents: Value) -> Self {
        let definition = ResourceDefinition {
            uri: uri.to_string(),
            name: Some(uri.rsplit('/').next().unwrap_or(uri).to_string()),
            description: None,
            mime_type: mime.map(str::to_string),
            size: None,
        };
        self.resources.lock().unwrap().push((definition, contents));
        self
    }

    pub fn with_handler(
        mut self,
        handler: impl Fn(&str, &Value) -> Result<Value, BackendError> + Send + Sync + 'static,
    ) -> Self {
        self.handler = Arc::new(handler);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.call_delay = delay;
        self
    }

    pub fn failing(self) -> Self {
        self.fail_connect.store(true, Ordering::SeqCst);
        self
    }

    pub fn set_tools(&self, tools: Vec<ToolDefinition>) {
        *self.tools.lock().unwrap() = tools;
    }

    /// Session ids that served each call, in call order.
    pub fn call_sessions(&self) -> Vec<u64> {
        self.call_sessions.lock().unwrap().clone()
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// Factory handing out `FakeSession`s for registered backends.
#[derive(Default)]
pub struct FakeFactory {
    backends: Mutex<HashMap<String, Arc<FakeBackend>>>,
    next_id: AtomicU64,
}

impl FakeFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backend(self, name: &str, backend: FakeBackend) -> Self {
        self.backends
            .lock()
            .unwrap()
            .insert(name.to_string(), Arc::new(backend));
        self
    }

    pub fn backend(&self, name: &str) -> Arc<FakeBackend> {
        Arc::clone(self.backends.lock().unwrap().get(name).expect("unknown fake backend"))
    }
}

#[async_trait]
impl SessionFactory for FakeFactory {
    async fn connect(
        &self,
        name: &str,
        _config: &BackendConfig,
    ) -> Result<Box<dyn BackendSession>, BackendError> {
        let backend = self.backends.lock().unwrap().get(name).cloned();
        let Some(backend) = backend else {
            return Err(BackendError::SpawnFailed {
                name: name.to_string(),
                reason: "no such fake backend".into(),
            });
        };
        if backend.fail_connect.load(Ordering::SeqCst) {
            return Err(BackendError::InitFailed {
                name: name.to_string(),
                reason: "scripted connect failure".into(),
            });
        }
        backend.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            name: name.to_string(),
            info: ServerInfo {
                name: Some(format!("fake-{name}")),
                version: Some("1.0.0".into()),
            },
            backend,
            closed: AtomicBool::new(false),
        }))
    }
}

pub struct FakeSession {
    id: u64,
    name: String,
    info: ServerInfo,
    backend: Arc<FakeBackend>,
    closed: AtomicBool,
}

impl FakeSession {
    fn transport_error(&self, reason: &str) -> BackendError {
        BackendError::TransportError {
            backend: self.name.clone(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl BackendSession for FakeSession {
    fn backend(&self) -> &str {
        &self.name
    }

    fn server_info(&self) -> Option<&ServerInfo> {
        Some(&self.info)
    }

    fn instructions(&self) -> Option<&str> {
        Some("Scripted backend for tests.")
    }

    async fn list_tools(&self) -> Result<Vec<ToolDefinition>, BackendError> {
        if self.backend.fail_list.load(Ordering::SeqCst) {
            return Err(self.transport_error("scripted list failure"));
        }
        Ok(self.backend.tools.lock().unwrap().clone())
    }

    async fn list_resources(&self) -> Result<Vec<ResourceDefinition>, BackendError> {
        if self.backend.fail_list.load(Ordering::SeqCst) {
            return Err(self.transport_error("scripted list failure"));
        }
        let resources = self.backend.resources.lock().unwrap();
        Ok(resources.iter().map(|(d, _)| d.clone()).collect())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, BackendError> {
        let backend = &self.backend;
        backend.calls.fetch_add(1, Ordering::SeqCst);
        backend.call_sessions.lock().unwrap().push(self.id);

        let now = backend.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        backend.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !backend.call_delay.is_zero() {
            tokio::time::sleep(backend.call_delay).await;
        }
        backend.in_flight.fetch_sub(1, Ordering::SeqCst);

        (backend.handler)(name, &arguments)
    }

    async fn read_resource(&self, uri: &str) -> Result<Value, BackendError> {
        let resources = self.backend.resources.lock().unwrap();
        resources
            .iter()
            .find(|(d, _)| d.uri == uri)
            .map(|(_, contents)| contents.clone())
            .ok_or_else(|| BackendError::ServerError {
                code: -32002,
                message: format!("Resource not found: {uri}"),
                data: None,
            })
    }

    async fn ping(&self) -> Result<(), BackendError> {
        self.backend.pings.fetch_add(1, Ordering::SeqCst);
        if self.backend.hang_ping.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.backend.fail_ping.load(Ordering::SeqCst) {
            return Err(self.transport_error("scripted ping failure"));
        }
        Ok(())
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.backend.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}
