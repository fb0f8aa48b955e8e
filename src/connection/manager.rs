//! Connection Manager.
//!
//! Turns the session factory into scoped sessions using one of two
//! strategies:
//!
//! - **isolated**: every `acquire` opens a fresh session that is closed on
//!   release
//! - **pool**: every backend gets a `SessionPool` of at most
//!   `pool_max_size` long-lived sessions
//!
//! Backends are independent: a failure to connect one surfaces as an error
//! from `acquire` for that backend only.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::guard::ScopedSession;
use super::pool::{PoolStats, SessionPool};
use crate::backend::{BackendError, SessionFactory};
use crate::config::{BackendConfig, ConnectionMode};

struct BackendEntry {
    config: BackendConfig,
    pool: Option<Arc<SessionPool>>,
}

pub struct ConnectionManager {
    factory: Arc<dyn SessionFactory>,
    strategy: RwLock<(ConnectionMode, usize)>,
    backends: RwLock<HashMap<String, BackendEntry>>,
}

impl ConnectionManager {
    pub fn new(factory: Arc<dyn SessionFactory>, mode: ConnectionMode, pool_max_size: usize) -> Self {
        Self {
            factory,
            strategy: RwLock::new((mode, pool_max_size.max(1))),
            backends: RwLock::new(HashMap::new()),
        }
    }

    pub fn factory(&self) -> Arc<dyn SessionFactory> {
        Arc::clone(&self.factory)
    }

    pub async fn mode(&self) -> ConnectionMode {
        self.strategy.read().await.0
    }

    /// Register (or replace) a backend. A replaced backend's pool is closed.
    pub async fn register(&self, name: &str, config: BackendConfig) {
        let (mode, max_size) = *self.strategy.read().await;
        let pool = (mode == ConnectionMode::Pool).then(|| {
            Arc::new(SessionPool::new(
                name,
                config.clone(),
                Arc::clone(&self.factory),
                max_size,
            ))
        });

        let previous = self
            .backends
            .write()
            .await
            .insert(name.to_string(), BackendEntry { config, pool });

        if let Some(BackendEntry { pool: Some(old), .. }) = previous {
            old.close().await;
        }
        tracing::debug!(backend = name, ?mode, "backend registered with connection manager");
    }

    /// Forget a backend, closing its pool.
    pub async fn unregister(&self, name: &str) {
        let removed = self.backends.write().await.remove(name);
        if let Some(BackendEntry { pool: Some(pool), .. }) = removed {
            pool.close().await;
        }
    }

    pub async fn is_registered(&self, name: &str) -> bool {
        self.backends.read().await.contains_key(name)
    }

    pub async fn registered(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn config(&self, name: &str) -> Option<BackendConfig> {
        self.backends.read().await.get(name).map(|e| e.config.clone())
    }

    /// Acquire a session for `backend` using the configured strategy.
    pub async fn acquire(&self, backend: &str) -> Result<ScopedSession, BackendError> {
        let (config, pool) = self.lookup(backend).await?;
        match pool {
            Some(pool) => pool.checkout().await,
            None => self.open_ephemeral(backend, &config).await,
        }
    }

    /// Acquire a fresh session regardless of strategy. Used by health checks
    /// so probes never occupy a pool slot.
    pub async fn acquire_ephemeral(&self, backend: &str) -> Result<ScopedSession, BackendError> {
        let (config, _) = self.lookup(backend).await?;
        self.open_ephemeral(backend, &config).await
    }

    /// Switch strategy. Existing pools are closed and rebuilt as needed.
    pub async fn set_strategy(&self, mode: ConnectionMode, pool_max_size: usize) {
        let pool_max_size = pool_max_size.max(1);
        {
            let mut strategy = self.strategy.write().await;
            if *strategy == (mode, pool_max_size) {
                return;
            }
            *strategy = (mode, pool_max_size);
        }

        let entries: Vec<(String, BackendConfig)> = self
            .backends
            .read()
            .await
            .iter()
            .map(|(name, entry)| (name.clone(), entry.config.clone()))
            .collect();
        for (name, config) in entries {
            self.register(&name, config).await;
        }
        tracing::info!(?mode, pool_max_size, "connection strategy changed");
    }

    pub async fn pool_stats(&self, backend: &str) -> Option<PoolStats> {
        let backends = self.backends.read().await;
        backends.get(backend)?.pool.as_ref().map(|p| p.stats())
    }

    /// Close every pool and forget all backends.
    pub async fn close_all(&self) {
        let drained: Vec<BackendEntry> = self.backends.write().await.drain().map(|(_, e)| e).collect();
        for entry in drained {
            if let Some(pool) = entry.pool {
                pool.close().await;
            }
        }
    }

    async fn lookup(
        &self,
        backend: &str,
    ) -> Result<(BackendConfig, Option<Arc<SessionPool>>), BackendError> {
        let backends = self.backends.read().await;
        let entry = backends.get(backend).ok_or_else(|| BackendError::UnknownBackend {
            name: backend.to_string(),
        })?;
        Ok((entry.config.clone(), entry.pool.clone()))
    }

    async fn open_ephemeral(
        &self,
        backend: &str,
        config: &BackendConfig,
    ) -> Result<ScopedSession, BackendError> {
        let session = self.factory.connect(backend, config).await.map_err(|e| {
            tracing::warn!(backend, error = %e, "failed to open session");
            e
        })?;
        Ok(ScopedSession::ephemeral(Arc::from(session)))
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
