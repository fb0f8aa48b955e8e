//! The gateway context: one Connection Manager, one Capability Cache, one
//! Health Monitor, and the active config, built once and shared by
//! reference with the dispatcher and front ends.
//!
//! Also hosts the administrative mutations (toggle, per-operation enable,
//! hot reload). Mutations are serialised; reads never wait on them.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde::Serialize;
use tokio::task::JoinHandle;

use super::errors::GatewayError;
use crate::backend::{create_factory, BackendError, SessionFactory};
use crate::cache::{resources_overview, tools_overview, CapabilityCache};
use crate::compress::{ResponseCompressor, SchemaCompressor};
use crate::config::{BackendConfig, ConfigError, GatewayConfig, TransportKind};
use crate::connection::{ConnectionManager, PoolStats};
use crate::health::{HealthMonitor, HealthSettings, HealthSnapshot, HealthStatus};

/// Per-backend row for administrative listings.
#[derive(Debug, Clone, Serialize)]
pub struct BackendStatus {
    pub name: String,
    pub enabled: bool,
    pub transport: TransportKind,
    pub target: String,
    pub connected: bool,
    pub server_name: Option<String>,
    pub version: Option<String>,
    pub instructions: Option<String>,
    pub operations: usize,
    pub resources: usize,
    pub health: Option<HealthStatus>,
    pub pool: Option<PoolStats>,
}

/// What a hot reload changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub reconnected: Vec<String>,
    /// Backends that are configured but could not be loaded yet.
    pub failed: Vec<(String, String)>,
}

pub struct GatewayContext {
    config: RwLock<Arc<GatewayConfig>>,
    manager: Arc<ConnectionManager>,
    cache: Arc<CapabilityCache>,
    health: Arc<HealthMonitor>,
    recovery: Mutex<Option<JoinHandle<()>>>,
    admin: Arc<tokio::sync::Mutex<()>>,
}

impl GatewayContext {
    /// Connect to real backends as described by `config`.
    pub async fn from_config(config: GatewayConfig) -> Arc<Self> {
        let factory = create_factory(&config);
        Self::initialize(config, factory).await
    }

    /// Register every enabled backend, populate the cache, and start health
    /// monitoring. Backends that fail to load are logged and left out of
    /// the cache; they stay monitored and are loaded once they recover.
    pub async fn initialize(config: GatewayConfig, factory: Arc<dyn SessionFactory>) -> Arc<Self> {
        let manager = Arc::new(ConnectionManager::new(
            factory,
            config.connection_mode,
            config.pool_max_size,
        ));
        let health = Arc::new(HealthMonitor::new(
            Arc::clone(&manager),
            HealthSettings::from_config(&config),
        ));
        let cache = Arc::new(CapabilityCache::new());

        let mut names = Vec::new();
        for (name, backend) in config.enabled_backends() {
            tracing::info!(
                backend = %name,
                transport = backend.transport.as_str(),
                target = %backend.target(),
                "registering backend"
            );
            manager.register(name, backend.clone()).await;
            health.add_backend(name);
            names.push(name.clone());
        }

        let report = cache.initialize(&manager, &names).await;
        tracing::info!(
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            operations = cache.operation_count(),
            "capability cache initialized"
        );

        let health_enabled = config.health_check_enabled;
        let context = Arc::new(Self {
            config: RwLock::new(Arc::new(config)),
            manager,
            cache,
            health,
            recovery: Mutex::new(None),
            admin: Arc::new(tokio::sync::Mutex::new(())),
        });

        context.spawn_recovery_listener();
        if health_enabled {
            context.health.start().await;
        }
        context
    }

    /// Stop health checks and close every session.
    pub async fn close(&self) {
        self.health.stop().await;
        let recovery = self
            .recovery
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = recovery {
            task.abort();
        }
        self.manager.close_all().await;
        tracing::info!("gateway context closed");
    }

    // ── Accessors ───────────────────────────────────────────────────────

    pub fn config(&self) -> Arc<GatewayConfig> {
        Arc::clone(&self.config.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn cache(&self) -> &CapabilityCache {
        &self.cache
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    pub fn is_operation_disabled(&self, backend: &str, operation: &str) -> bool {
        self.config().is_operation_disabled(backend, operation)
    }

    pub fn schema_compressor(&self) -> SchemaCompressor {
        let config = self.config();
        SchemaCompressor::new(config.schema_descriptions_enabled, config.schema_description_max_len)
    }

    pub fn response_compressor(&self) -> ResponseCompressor {
        let config = self.config();
        ResponseCompressor::new(config.toon_compression_enabled, config.toon_compression_min_size)
    }

    pub fn get_health_snapshot(&self) -> HealthSnapshot {
        self.health.snapshot()
    }

    /// Visible operations, one per line.
    pub fn tools_overview(&self) -> String {
        let config = self.config();
        tools_overview(&self.cache, |backend, op| config.is_operation_disabled(backend, op))
    }

    pub fn resources_overview(&self) -> String {
        resources_overview(&self.cache)
    }

    pub async fn list_backends(&self) -> Vec<BackendStatus> {
        let config = self.config();
        let mut rows = Vec::with_capacity(config.backends.len());
        for (name, backend) in &config.backends {
            let snapshot = self.cache.snapshot(name);
            rows.push(BackendStatus {
                name: name.clone(),
                enabled: backend.enabled,
                transport: backend.transport,
                target: backend.target(),
                connected: snapshot.is_some(),
                server_name: snapshot.as_ref().map(|s| s.info.server_name.clone()),
                version: snapshot.as_ref().map(|s| s.info.version.clone()),
                instructions: snapshot.as_ref().and_then(|s| s.info.instructions.clone()),
                operations: snapshot.as_ref().map_or(0, |s| s.operations.len()),
                resources: snapshot.as_ref().map_or(0, |s| s.resources.len()),
                health: self.health.get_status(name).map(|r| r.status),
                pool: self.manager.pool_stats(name).await,
            });
        }
        rows
    }

    // ── Mutations ───────────────────────────────────────────────────────

    /// Flip a backend's `enabled` flag. Returns the new value.
    pub async fn toggle_backend(&self, name: &str) -> Result<bool, GatewayError> {
        let _admin = self.admin.lock().await;
        let mut next = (*self.config()).clone();
        let available: Vec<String> = next.backends.keys().cloned().collect();
        let Some(backend) = next.backends.get_mut(name) else {
            return Err(GatewayError::BackendNotFound {
                backend: name.to_string(),
                available,
            });
        };

        backend.enabled = !backend.enabled;
        let enabled = backend.enabled;
        let backend = backend.clone();

        if enabled {
            if let Err(e) = self.connect_backend(name, backend).await {
                tracing::warn!(backend = name, error = %e, "enabled backend is not reachable yet");
            }
        } else {
            self.disconnect_backend(name).await;
        }
        self.store_config(next);
        tracing::info!(backend = name, enabled, "backend toggled");
        Ok(enabled)
    }

    /// Show or hide one operation.
    pub async fn set_operation_enabled(
        &self,
        backend: &str,
        operation: &str,
        enabled: bool,
    ) -> Result<(), GatewayError> {
        let _admin = self.admin.lock().await;
        let mut next = (*self.config()).clone();
        if !next.backends.contains_key(backend) {
            return Err(GatewayError::BackendNotFound {
                backend: backend.to_string(),
                available: next.backends.keys().cloned().collect(),
            });
        }

        let key = format!("{backend}.{operation}");
        next.disabled_operations.retain(|k| *k != key);
        if !enabled {
            next.disabled_operations.push(key);
        }
        self.store_config(next);
        tracing::info!(backend, operation, enabled, "operation visibility changed");
        Ok(())
    }

    /// Hot reload. Backends are diffed by name: removed or disabled ones are
    /// disconnected, new ones connected, and ones whose transport settings
    /// changed are reconnected. Global flags take effect immediately.
    pub async fn apply_config(&self, new: GatewayConfig) -> Result<ApplyReport, ConfigError> {
        new.validate()?;
        let _admin = self.admin.lock().await;
        let old = self.config();
        let mut report = ApplyReport::default();

        let old_enabled = enabled_map(&old);
        let new_enabled = enabled_map(&new);

        self.manager
            .set_strategy(new.connection_mode, new.pool_max_size)
            .await;

        for name in old_enabled.keys() {
            if !new_enabled.contains_key(name) {
                self.disconnect_backend(name).await;
                report.removed.push(name.clone());
            }
        }

        for (name, backend) in new_enabled {
            match old_enabled.get(&name) {
                Some(previous) if previous.same_transport(&backend) => continue,
                Some(_) => {
                    self.disconnect_backend(&name).await;
                    report.reconnected.push(name.clone());
                }
                None => report.added.push(name.clone()),
            }
            if let Err(e) = self.connect_backend(&name, backend).await {
                report.failed.push((name, e.to_string()));
            }
        }

        let settings = HealthSettings::from_config(&new);
        if settings != self.health.settings() || new.health_check_enabled != old.health_check_enabled {
            self.health.stop().await;
            self.health.set_settings(settings);
            if new.health_check_enabled {
                self.health.start().await;
            }
        }

        if new.operation_names != old.operation_names {
            tracing::warn!("operation_names changes take effect after restart");
        }
        if new.init_timeout != old.init_timeout || new.call_timeout != old.call_timeout {
            tracing::warn!("backend session timeouts take effect after restart");
        }

        tracing::info!(
            added = report.added.len(),
            removed = report.removed.len(),
            reconnected = report.reconnected.len(),
            failed = report.failed.len(),
            "configuration applied"
        );
        self.store_config(new);
        Ok(report)
    }

    // ── Internals ───────────────────────────────────────────────────────

    async fn connect_backend(&self, name: &str, backend: BackendConfig) -> Result<(), BackendError> {
        self.manager.register(name, backend).await;
        self.health.add_backend(name);
        self.cache.refresh(&self.manager, name).await
    }

    async fn disconnect_backend(&self, name: &str) {
        self.cache.remove(name);
        self.health.remove_backend(name);
        self.manager.unregister(name).await;
        tracing::info!(backend = name, "backend disconnected");
    }

    fn store_config(&self, config: GatewayConfig) {
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(config);
    }

    /// Refresh the cache when a backend recovers, or when a backend that
    /// never loaded becomes reachable.
    fn spawn_recovery_listener(&self) {
        let Some(mut events) = self.health.take_recovery_events() else {
            return;
        };
        let cache = Arc::clone(&self.cache);
        let manager = Arc::clone(&self.manager);
        let admin = Arc::clone(&self.admin);

        let task = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                // Serialised with admin mutations so a removed backend is never re-cached.
                let _admin = admin.lock().await;
                if !manager.is_registered(&event.backend).await {
                    continue;
                }
                if event.previous == HealthStatus::Unhealthy || !cache.contains(&event.backend) {
                    tracing::info!(backend = %event.backend, "backend recovered, refreshing capabilities");
                    if let Err(e) = cache.refresh(&manager, &event.backend).await {
                        tracing::debug!(backend = %event.backend, error = %e, "recovery refresh skipped");
                    }
                }
            }
        });
        *self.recovery.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);
    }
}

fn enabled_map(config: &GatewayConfig) -> BTreeMap<String, BackendConfig> {
    config
        .enabled_backends()
        .map(|(name, backend)| (name.clone(), backend.clone()))
        .collect()
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::backend::testing::{FakeBackend, FakeFactory};

    fn config(names: &[&str]) -> GatewayConfig {
        let mut config = GatewayConfig {
            health_check_enabled: false,
            ..GatewayConfig::default()
        };
        for name in names {
            config
                .backends
                .insert(name.to_string(), BackendConfig::stdio("fake", &[]));
        }
        config
    }

    fn fs_backend() -> FakeBackend {
        FakeBackend::default().with_tool(
            "read_file",
            json!({"type": "object", "properties": {"path": {"type": "string"}}, "required": ["path"]}),
        )
    }

    #[tokio::test]
    async fn test_initialize_isolates_failed_backend() {
        let factory = Arc::new(
            FakeFactory::new()
                .with_backend("fs", fs_backend())
                .with_backend("git", FakeBackend::default().with_tool("status", json!({})))
                .with_backend("bad", FakeBackend::default().with_tool("x", json!({})).failing()),
        );
        let context = GatewayContext::initialize(config(&["fs", "git", "bad"]), factory).await;

        assert_eq!(context.cache().list_operations("fs").len(), 1);
        assert_eq!(context.cache().list_operations("git").len(), 1);
        assert!(context.cache().list_operations("bad").is_empty());
        assert!(!context.cache().contains("bad"));

        let rows = context.list_backends().await;
        let bad = rows.iter().find(|r| r.name == "bad").unwrap();
        assert!(bad.enabled && !bad.connected);
        assert_eq!(bad.health, Some(HealthStatus::Unknown));
        let fs = rows.iter().find(|r| r.name == "fs").unwrap();
        assert_eq!(fs.server_name.as_deref(), Some("fake-fs"));
        assert_eq!(fs.operations, 1);

        context.close().await;
    }

    #[tokio::test]
    async fn test_disabled_backend_is_not_connected() {
        let factory = Arc::new(FakeFactory::new().with_backend("fs", fs_backend()));
        let mut cfg = config(&["fs"]);
        if let Some(fs) = cfg.backends.get_mut("fs") {
            fs.enabled = false;
        }
        let context = GatewayContext::initialize(cfg, Arc::clone(&factory) as Arc<dyn SessionFactory>).await;

        assert!(!context.cache().contains("fs"));
        assert_eq!(FakeBackend::count(&factory.backend("fs").connects), 0);
        context.close().await;
    }

    #[tokio::test]
    async fn test_toggle_backend() {
        let factory = Arc::new(FakeFactory::new().with_backend("fs", fs_backend()));
        let context = GatewayContext::initialize(config(&["fs"]), factory).await;

        assert!(!context.toggle_backend("fs").await.unwrap());
        assert!(!context.cache().contains("fs"));
        assert!(!context.manager().is_registered("fs").await);
        assert!(context.health().get_status("fs").is_none());
        assert!(!context.config().backends["fs"].enabled);

        assert!(context.toggle_backend("fs").await.unwrap());
        assert!(context.cache().contains("fs"));
        assert!(context.config().backends["fs"].enabled);

        let err = context.toggle_backend("nope").await.unwrap_err();
        assert!(matches!(err, GatewayError::BackendNotFound { .. }));
        context.close().await;
    }

    #[tokio::test]
    async fn test_set_operation_enabled() {
        let factory = Arc::new(FakeFactory::new().with_backend("fs", fs_backend()));
        let context = GatewayContext::initialize(config(&["fs"]), factory).await;

        context.set_operation_enabled("fs", "read_file", false).await.unwrap();
        assert!(context.is_operation_disabled("fs", "read_file"));
        assert_eq!(context.tools_overview(), "No tools available.");

        context.set_operation_enabled("fs", "read_file", true).await.unwrap();
        assert!(!context.is_operation_disabled("fs", "read_file"));
        assert!(context.tools_overview().contains("fs.read_file(path)"));
        context.close().await;
    }

    #[tokio::test]
    async fn test_apply_config_diffs_backends() {
        let factory = Arc::new(
            FakeFactory::new()
                .with_backend("fs", fs_backend())
                .with_backend("git", FakeBackend::default())
                .with_backend("web", FakeBackend::default()),
        );
        let context =
            GatewayContext::initialize(config(&["fs", "git"]), Arc::clone(&factory) as Arc<dyn SessionFactory>)
                .await;

        let mut next = config(&["git", "web"]);
        next.backends
            .insert("git".into(), BackendConfig::stdio("fake", &["--v2"]));
        next.toon_compression_min_size = 5;

        let report = context.apply_config(next).await.unwrap();
        assert_eq!(report.removed, vec!["fs".to_string()]);
        assert_eq!(report.added, vec!["web".to_string()]);
        assert_eq!(report.reconnected, vec!["git".to_string()]);
        assert!(report.failed.is_empty());

        assert!(!context.cache().contains("fs"));
        assert!(context.cache().contains("web"));
        assert_eq!(context.config().toon_compression_min_size, 5);
        assert_eq!(context.manager().registered().await, vec!["git", "web"]);
        context.close().await;
    }

    #[tokio::test]
    async fn test_apply_config_rejects_invalid() {
        let factory = Arc::new(FakeFactory::new().with_backend("fs", fs_backend()));
        let context = GatewayContext::initialize(config(&["fs"]), factory).await;

        let mut bad = config(&["fs"]);
        bad.pool_max_size = 0;
        assert!(context.apply_config(bad).await.is_err());
        assert_eq!(context.config().pool_max_size, 10);
        context.close().await;
    }

    #[tokio::test]
    async fn test_recovered_backend_is_loaded() {
        let factory = Arc::new(FakeFactory::new().with_backend("fs", fs_backend().failing()));
        let context =
            GatewayContext::initialize(config(&["fs"]), Arc::clone(&factory) as Arc<dyn SessionFactory>).await;
        assert!(!context.cache().contains("fs"));

        factory.backend("fs").fail_connect.store(false, Ordering::SeqCst);
        assert!(context.health().check_backend("fs").await);

        let loaded = tokio::time::timeout(Duration::from_secs(1), async {
            while !context.cache().contains("fs") {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(loaded.is_ok(), "recovered backend should be loaded");
        assert_eq!(context.cache().list_operations("fs").len(), 1);
        context.close().await;
    }

    #[tokio::test]
    async fn test_recovery_after_disconnect_is_ignored() {
        let factory = Arc::new(FakeFactory::new().with_backend("fs", fs_backend().failing()));
        let context =
            GatewayContext::initialize(config(&["fs"]), Arc::clone(&factory) as Arc<dyn SessionFactory>).await;
        factory.backend("fs").fail_connect.store(false, Ordering::SeqCst);

        {
            let _admin = context.admin.lock().await;
            assert!(context.health().check_backend("fs").await);
            tokio::time::sleep(Duration::from_millis(20)).await;
            context.disconnect_backend("fs").await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(!context.cache().contains("fs"));
        context.close().await;
    }

    #[tokio::test]
    async fn test_health_snapshot_reflects_monitor() {
        let factory = Arc::new(FakeFactory::new().with_backend("fs", fs_backend()));
        let context = GatewayContext::initialize(config(&["fs"]), factory).await;

        context.health().check_backend("fs").await;
        let snapshot = context.get_health_snapshot();
        assert!(!snapshot.running);
        assert_eq!(snapshot.summary.healthy, 1);
        context.close().await;
    }
}
