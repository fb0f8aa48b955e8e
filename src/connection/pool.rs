//! Bounded per-backend session pool.
//!
//! A semaphore with `max_size` permits bounds the number of sessions that
//! exist for a backend (idle + checked out). Checkout takes a permit, then
//! reuses an idle session or opens a new one; the permit travels with the
//! `ScopedSession` and is returned with it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::Semaphore;

use super::guard::ScopedSession;
use crate::backend::{BackendError, BackendSession, SessionFactory};
use crate::config::BackendConfig;

/// Point-in-time pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub max_size: usize,
    pub idle: usize,
    pub in_use: usize,
}

pub struct SessionPool {
    backend: String,
    config: BackendConfig,
    factory: Arc<dyn SessionFactory>,
    max_size: usize,
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<Arc<dyn BackendSession>>>,
    closed: AtomicBool,
}

impl SessionPool {
    pub fn new(
        backend: &str,
        config: BackendConfig,
        factory: Arc<dyn SessionFactory>,
        max_size: usize,
    ) -> Self {
        let max_size = max_size.max(1);
        Self {
            backend: backend.to_string(),
            config,
            factory,
            max_size,
            permits: Arc::new(Semaphore::new(max_size)),
            idle: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Check out a session, waiting while all `max_size` are in use.
    pub async fn checkout(self: &Arc<Self>) -> Result<ScopedSession, BackendError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| BackendError::PoolClosed {
                backend: self.backend.clone(),
            })?;

        let reused = self.idle.lock().ok().and_then(|mut idle| idle.pop());
        let session = match reused {
            Some(session) => session,
            None => {
                // On failure the permit drops here and the slot frees up.
                let session = self.factory.connect(&self.backend, &self.config).await?;
                tracing::debug!(backend = %self.backend, "opened pooled session");
                Arc::from(session)
            }
        };

        Ok(ScopedSession::pooled(session, Arc::clone(self), permit))
    }

    /// Put a session back. Returns it if the pool no longer accepts it.
    pub(crate) fn check_in(
        &self,
        session: Arc<dyn BackendSession>,
    ) -> Option<Arc<dyn BackendSession>> {
        if self.closed.load(Ordering::SeqCst) {
            return Some(session);
        }
        match self.idle.lock() {
            Ok(mut idle) => {
                idle.push(session);
                None
            }
            Err(_) => Some(session),
        }
    }

    /// Refuse new checkouts and close every idle session. Sessions still
    /// checked out are closed when their guards release.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.permits.close();

        let drained: Vec<Arc<dyn BackendSession>> = self
            .idle
            .lock()
            .map(|mut idle| idle.drain(..).collect())
            .unwrap_or_default();
        for session in drained {
            session.close().await;
        }
        tracing::debug!(backend = %self.backend, "session pool closed");
    }

    pub fn stats(&self) -> PoolStats {
        let idle = self.idle.lock().map(|idle| idle.len()).unwrap_or(0);
        let available = if self.closed.load(Ordering::SeqCst) {
            self.max_size
        } else {
            self.permits.available_permits()
        };
        PoolStats {
            max_size: self.max_size,
            idle,
            in_use: self.max_size.saturating_sub(available),
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
