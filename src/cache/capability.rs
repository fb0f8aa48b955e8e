//! Capability Cache.
//!
//! Holds one immutable `BackendSnapshot` per connected backend. Population
//! opens an ephemeral session, enumerates operations and resources, and
//! closes it again; failures are per backend and never abort the others.
//!
//! Readers clone an `Arc` out of the map and never observe a half-built
//! snapshot: `refresh` builds the replacement first and swaps it in with a
//! single insert.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

use chrono::Utc;
use futures::future::join_all;
use serde_json::Value;

use super::types::{BackendInfo, BackendSnapshot, LoadReport, OperationInfo, ResourceInfo};
use crate::backend::{BackendError, BackendSession, ResourceDefinition};
use crate::connection::ConnectionManager;

/// Characters of content used for an auto-generated resource description.
const DESCRIPTION_PREVIEW_CHARS: usize = 100;

/// MIME prefixes whose content is read as text.
const TEXT_MIME_PREFIXES: &[&str] = &[
    "text/",
    "application/json",
    "application/xml",
    "application/javascript",
    "application/x-javascript",
    "application/x-yaml",
    "application/yaml",
    "application/x-sh",
    "application/x-python",
    "application/x-toml",
];

/// Whether a MIME type denotes textual content. Suffix forms such as
/// `application/ld+json` are not recognised.
pub fn is_text_mime(mime: Option<&str>) -> bool {
    let Some(mime) = mime else {
        return false;
    };
    let mime = mime.to_ascii_lowercase();
    TEXT_MIME_PREFIXES.iter().any(|prefix| mime.starts_with(prefix))
}

// ─── Cache ───────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct CapabilityCache {
    snapshots: RwLock<HashMap<String, Arc<BackendSnapshot>>>,
}

impl CapabilityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Populate every listed backend concurrently.
    ///
    /// Never fails as a whole: backends that cannot be loaded are reported
    /// in `LoadReport::failed` and left out of the cache.
    pub async fn initialize(&self, manager: &ConnectionManager, backends: &[String]) -> LoadReport {
        let loads = backends.iter().map(|name| async move {
            let result = load_snapshot(manager, name).await;
            (name.clone(), result)
        });

        let mut report = LoadReport::default();
        for (name, result) in join_all(loads).await {
            match result {
                Ok(snapshot) => {
                    tracing::info!(
                        backend = %name,
                        operations = snapshot.operations.len(),
                        resources = snapshot.resources.len(),
                        server = %snapshot.info.server_name,
                        version = %snapshot.info.version,
                        "backend capabilities cached"
                    );
                    self.store(snapshot);
                    report.loaded.push(name);
                }
                Err(e) => {
                    tracing::error!(backend = %name, error = %e, "failed to load backend capabilities");
                    report.failed.push((name, e.to_string()));
                }
            }
        }
        report
    }

    /// Re-enumerate one backend and swap its snapshot.
    ///
    /// If enumeration fails the previous snapshot stays in place.
    pub async fn refresh(&self, manager: &ConnectionManager, backend: &str) -> Result<(), BackendError> {
        let snapshot = load_snapshot(manager, backend).await.map_err(|e| {
            tracing::warn!(backend, error = %e, "capability refresh failed, keeping previous snapshot");
            e
        })?;
        tracing::info!(
            backend,
            operations = snapshot.operations.len(),
            resources = snapshot.resources.len(),
            "backend capabilities refreshed"
        );
        self.store(snapshot);
        Ok(())
    }

    /// Insert or replace a snapshot.
    pub fn store(&self, snapshot: BackendSnapshot) {
        let name = snapshot.info.name.clone();
        self.snapshots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, Arc::new(snapshot));
    }

    /// Drop a backend's entries. Returns whether it was present.
    pub fn remove(&self, backend: &str) -> bool {
        self.snapshots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(backend)
            .is_some()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<BackendSnapshot>>> {
        self.snapshots.read().unwrap_or_else(PoisonError::into_inner)
    }

    // ─── Lookups ─────────────────────────────────────────────────────────────

    /// Cached backend names, sorted.
    pub fn backends(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn contains(&self, backend: &str) -> bool {
        self.read().contains_key(backend)
    }

    pub fn snapshot(&self, backend: &str) -> Option<Arc<BackendSnapshot>> {
        self.read().get(backend).cloned()
    }

    pub fn backend_info(&self, backend: &str) -> Option<BackendInfo> {
        self.snapshot(backend).map(|s| s.info.clone())
    }

    pub fn list_operations(&self, backend: &str) -> Vec<OperationInfo> {
        self.snapshot(backend)
            .map(|s| s.operations.clone())
            .unwrap_or_default()
    }

    pub fn get_operation(&self, backend: &str, operation: &str) -> Option<OperationInfo> {
        self.snapshot(backend)?.operation(operation).cloned()
    }

    pub fn list_resources(&self, backend: &str) -> Vec<ResourceInfo> {
        self.snapshot(backend)
            .map(|s| s.resources.clone())
            .unwrap_or_default()
    }

    pub fn get_resource(&self, backend: &str, uri: &str) -> Option<ResourceInfo> {
        self.snapshot(backend)?.resource(uri).cloned()
    }

    pub fn operation_count(&self) -> usize {
        self.read().values().map(|s| s.operations.len()).sum()
    }
}

// ─── Population ──────────────────────────────────────────────────────────────

/// Open an ephemeral session to `backend` and build its snapshot.
pub async fn load_snapshot(
    manager: &ConnectionManager,
    backend: &str,
) -> Result<BackendSnapshot, BackendError> {
    let mut session = manager.acquire_ephemeral(backend).await?;
    let result = discover(&*session, backend).await;
    session.track(&result);
    session.release().await;
    result
}

async fn discover(session: &dyn BackendSession, backend: &str) -> Result<BackendSnapshot, BackendError> {
    let reported = session.server_info();
    let info = BackendInfo {
        name: backend.to_string(),
        server_name: reported
            .and_then(|i| i.name.clone())
            .unwrap_or_else(|| backend.to_string()),
        version: reported
            .and_then(|i| i.version.clone())
            .unwrap_or_else(|| "unknown".to_string()),
        instructions: session.instructions().map(str::to_string),
    };

    let operations = session
        .list_tools()
        .await?
        .into_iter()
        .map(|tool| OperationInfo {
            backend: backend.to_string(),
            name: tool.name,
            description: tool.description.unwrap_or_default(),
            input_schema: tool.input_schema,
        })
        .collect();

    let listed = match session.list_resources().await {
        Ok(resources) => resources,
        Err(e) => {
            tracing::warn!(backend, error = %e, "failed to list resources");
            Vec::new()
        }
    };

    let mut resources = Vec::with_capacity(listed.len());
    for resource in listed {
        resources.push(describe_resource(session, backend, resource).await);
    }

    Ok(BackendSnapshot {
        info,
        operations,
        resources,
        loaded_at: Utc::now(),
    })
}

/// Convert a listed resource, deriving a description from the content of
/// undescribed text resources.
async fn describe_resource(
    session: &dyn BackendSession,
    backend: &str,
    resource: ResourceDefinition,
) -> ResourceInfo {
    let mut description = resource.description.filter(|d| !d.is_empty());

    if description.is_none() && is_text_mime(resource.mime_type.as_deref()) {
        match session.read_resource(&resource.uri).await {
            Ok(contents) => description = first_text(&contents).map(preview),
            Err(e) => {
                tracing::debug!(backend, uri = %resource.uri, error = %e, "could not read resource for description");
            }
        }
    }

    ResourceInfo {
        backend: backend.to_string(),
        name: resource.name.unwrap_or_else(|| resource.uri.clone()),
        uri: resource.uri,
        description,
        mime_type: resource.mime_type,
        size: resource.size,
    }
}

fn first_text(contents: &Value) -> Option<&str> {
    contents
        .get("contents")?
        .as_array()?
        .first()?
        .get("text")?
        .as_str()
}

fn preview(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(DESCRIPTION_PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
