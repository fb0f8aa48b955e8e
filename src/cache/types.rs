//! Immutable capability records.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// One callable operation on one backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationInfo {
    pub backend: String,
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl OperationInfo {
    /// `backend.operation`
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.backend, self.name)
    }

    /// Declared property names, in declaration order.
    pub fn parameter_names(&self) -> Vec<&str> {
        self.input_schema
            .get("properties")
            .and_then(Value::as_object)
            .map(|props| props.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn required_parameters(&self) -> Vec<&str> {
        self.input_schema
            .get("required")
            .and_then(Value::as_array)
            .map(|req| req.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }
}

/// One readable resource on one backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceInfo {
    pub backend: String,
    pub uri: String,
    pub name: String,
    pub description: Option<String>,
    pub mime_type: Option<String>,
    pub size: Option<u64>,
}

/// What a backend reported about itself at connect time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendInfo {
    /// Config name.
    pub name: String,
    /// Self-reported server name (config name if none was reported).
    pub server_name: String,
    pub version: String,
    pub instructions: Option<String>,
}

/// Everything cached for one backend. Replaced wholesale, never mutated.
#[derive(Debug, Clone, Serialize)]
pub struct BackendSnapshot {
    pub info: BackendInfo,
    pub operations: Vec<OperationInfo>,
    pub resources: Vec<ResourceInfo>,
    pub loaded_at: DateTime<Utc>,
}

impl BackendSnapshot {
    pub fn operation(&self, name: &str) -> Option<&OperationInfo> {
        self.operations.iter().find(|op| op.name == name)
    }

    pub fn resource(&self, uri: &str) -> Option<&ResourceInfo> {
        self.resources.iter().find(|r| r.uri == uri)
    }
}

/// Outcome of populating several backends.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    pub failed: Vec<(String, String)>,
}
