//! Gateway configuration model.
//!
//! Mirrors the on-disk config file. Backends are keyed by name in the
//! `mcpServers` map; the key is the backend's identity everywhere else in the
//! crate. A `GatewayConfig` is never mutated after load — hot reload swaps in
//! a whole new value.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::errors::ConfigError;

// ─── Backend ─────────────────────────────────────────────────────────────────

/// How the gateway reaches a backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Spawn a child process and speak line-delimited JSON-RPC over stdio.
    #[default]
    Stdio,
    /// Connect to an HTTP(S) endpoint (streamable HTTP or SSE, by URL shape).
    Http,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stdio => "stdio",
            Self::Http => "http",
        }
    }
}

/// Configuration for a single backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default, rename = "type")]
    pub transport: TransportKind,

    // stdio
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Working directory for the spawned process.
    #[serde(default)]
    pub cwd: Option<String>,

    // http
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl BackendConfig {
    /// Stdio backend shorthand.
    pub fn stdio(command: &str, args: &[&str]) -> Self {
        Self {
            transport: TransportKind::Stdio,
            command: Some(command.to_string()),
            args: args.iter().map(|a| a.to_string()).collect(),
            env: HashMap::new(),
            cwd: None,
            url: None,
            headers: HashMap::new(),
            enabled: true,
        }
    }

    /// HTTP backend shorthand.
    pub fn http(url: &str) -> Self {
        Self {
            transport: TransportKind::Http,
            command: None,
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
            url: Some(url.to_string()),
            headers: HashMap::new(),
            enabled: true,
        }
    }

    /// Check that the fields required by the transport kind are present.
    pub fn validate(&self, name: &str) -> Result<(), ConfigError> {
        match self.transport {
            TransportKind::Stdio => {
                if self.command.as_deref().map_or(true, str::is_empty) {
                    return Err(ConfigError::Invalid {
                        reason: format!("backend '{name}': stdio type requires 'command'"),
                    });
                }
            }
            TransportKind::Http => {
                let url = self.url.as_deref().unwrap_or_default();
                if url.is_empty() {
                    return Err(ConfigError::Invalid {
                        reason: format!("backend '{name}': http type requires 'url'"),
                    });
                }
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(ConfigError::Invalid {
                        reason: format!("backend '{name}': url must be http(s), got '{url}'"),
                    });
                }
            }
        }
        Ok(())
    }

    /// Whether two configs open the same connection (ignores `enabled`).
    pub fn same_transport(&self, other: &BackendConfig) -> bool {
        self.transport == other.transport
            && self.command == other.command
            && self.args == other.args
            && self.env == other.env
            && self.cwd == other.cwd
            && self.url == other.url
            && self.headers == other.headers
    }

    /// Short human-readable target for logs (`npx -y server` or the URL).
    pub fn target(&self) -> String {
        match self.transport {
            TransportKind::Stdio => {
                let mut parts = vec![self.command.clone().unwrap_or_default()];
                parts.extend(self.args.iter().cloned());
                parts.join(" ")
            }
            TransportKind::Http => self.url.clone().unwrap_or_default(),
        }
    }
}

// ─── Global Settings ─────────────────────────────────────────────────────────

/// Session strategy used by the Connection Manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionMode {
    /// A fresh connect → use → close per call.
    #[default]
    #[serde(alias = "session_isolation")]
    Isolated,
    /// A bounded set of long-lived sessions per backend.
    Pool,
}

/// Names under which the three gateway operations are exposed to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationNames {
    #[serde(default = "default_describe_name")]
    pub describe: String,
    #[serde(default = "default_call_name")]
    pub call: String,
    #[serde(default = "default_read_name")]
    pub read: String,
}

impl Default for OperationNames {
    fn default() -> Self {
        Self {
            describe: default_describe_name(),
            call: default_call_name(),
            read: default_read_name(),
        }
    }
}

/// Top-level gateway configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default, rename = "mcpServers", alias = "backends")]
    pub backends: BTreeMap<String, BackendConfig>,

    // Schema compression
    #[serde(default = "default_true")]
    pub schema_compression_enabled: bool,
    #[serde(default = "default_true")]
    pub schema_descriptions_enabled: bool,
    #[serde(default = "default_description_max_len")]
    pub schema_description_max_len: usize,

    // Response compression
    #[serde(default = "default_true")]
    pub toon_compression_enabled: bool,
    #[serde(default = "default_min_size")]
    pub toon_compression_min_size: usize,
    /// When false, the front end returns only the compact text.
    #[serde(default = "default_true")]
    pub include_structured_content: bool,

    // Health checks (seconds)
    #[serde(default = "default_true")]
    pub health_check_enabled: bool,
    #[serde(default = "default_health_interval")]
    pub health_check_interval: u64,
    #[serde(default = "default_health_timeout")]
    pub health_check_timeout: u64,
    #[serde(default = "default_failure_threshold")]
    pub health_check_failure_threshold: u32,

    // Connections
    #[serde(default)]
    pub connection_mode: ConnectionMode,
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: usize,
    /// Per-call timeout in seconds.
    #[serde(default = "default_call_timeout")]
    pub call_timeout: u64,
    /// Connect + handshake timeout in seconds.
    #[serde(default = "default_init_timeout")]
    pub init_timeout: u64,

    /// Fully-qualified `backend.operation` names hidden from callers.
    #[serde(default)]
    pub disabled_operations: Vec<String>,

    // Process boundary
    #[serde(default = "default_listen_host")]
    pub listen_host: String,
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    #[serde(default = "default_port_retry_attempts")]
    pub port_retry_attempts: u16,

    #[serde(default)]
    pub operation_names: OperationNames,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            backends: BTreeMap::new(),
            schema_compression_enabled: true,
            schema_descriptions_enabled: true,
            schema_description_max_len: default_description_max_len(),
            toon_compression_enabled: true,
            toon_compression_min_size: default_min_size(),
            include_structured_content: true,
            health_check_enabled: true,
            health_check_interval: default_health_interval(),
            health_check_timeout: default_health_timeout(),
            health_check_failure_threshold: default_failure_threshold(),
            connection_mode: ConnectionMode::default(),
            pool_max_size: default_pool_max_size(),
            call_timeout: default_call_timeout(),
            init_timeout: default_init_timeout(),
            disabled_operations: Vec::new(),
            listen_host: default_listen_host(),
            listen_port: default_listen_port(),
            port_retry_attempts: default_port_retry_attempts(),
            operation_names: OperationNames::default(),
        }
    }
}

impl GatewayConfig {
    /// Structural validation run after parsing and before any connection.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, backend) in &self.backends {
            if name.is_empty() || name.contains('.') {
                return Err(ConfigError::Invalid {
                    reason: format!("backend name '{name}' must be non-empty and contain no '.'"),
                });
            }
            backend.validate(name)?;
        }
        if self.pool_max_size == 0 {
            return Err(ConfigError::Invalid {
                reason: "pool_max_size must be at least 1".into(),
            });
        }
        if self.health_check_failure_threshold == 0 {
            return Err(ConfigError::Invalid {
                reason: "health_check_failure_threshold must be at least 1".into(),
            });
        }
        if self.health_check_interval == 0 || self.health_check_timeout == 0 {
            return Err(ConfigError::Invalid {
                reason: "health check interval and timeout must be positive".into(),
            });
        }
        if self.call_timeout == 0 || self.init_timeout == 0 {
            return Err(ConfigError::Invalid {
                reason: "call_timeout and init_timeout must be positive".into(),
            });
        }
        let names = &self.operation_names;
        if names.describe == names.call || names.call == names.read || names.describe == names.read
        {
            return Err(ConfigError::Invalid {
                reason: "operation_names must be distinct".into(),
            });
        }
        Ok(())
    }

    /// Backends with `enabled: true`, in name order.
    pub fn enabled_backends(&self) -> impl Iterator<Item = (&String, &BackendConfig)> {
        self.backends.iter().filter(|(_, cfg)| cfg.enabled)
    }

    pub fn is_operation_disabled(&self, backend: &str, operation: &str) -> bool {
        let key = format!("{backend}.{operation}");
        self.disabled_operations.iter().any(|k| *k == key)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout)
    }

    pub fn init_timeout(&self) -> Duration {
        Duration::from_secs(self.init_timeout)
    }
}

// ─── Defaults ────────────────────────────────────────────────────────────────

fn default_true() -> bool {
    true
}
fn default_description_max_len() -> usize {
    50
}
fn default_min_size() -> usize {
    1
}
fn default_health_interval() -> u64 {
    30
}
fn default_health_timeout() -> u64 {
    5
}
fn default_failure_threshold() -> u32 {
    2
}
fn default_pool_max_size() -> usize {
    10
}
fn default_call_timeout() -> u64 {
    60
}
fn default_init_timeout() -> u64 {
    30
}
fn default_listen_host() -> String {
    "127.0.0.1".to_string()
}
fn default_listen_port() -> u16 {
    8000
}
fn default_port_retry_attempts() -> u16 {
    100
}
fn default_describe_name() -> String {
    "describe".to_string()
}
fn default_call_name() -> String {
    "call".to_string()
}
fn default_read_name() -> String {
    "read".to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
