//! Scoped session ownership.
//!
//! A `ScopedSession` is the only way callers touch a backend session. It is
//! released exactly once: explicitly through [`ScopedSession::release`], or
//! from `Drop` when the holder errors out, panics, or is cancelled. Only an
//! explicit release can return a session to its pool; a dropped guard may
//! have been cut off mid-request, so its session is closed instead.

use std::ops::Deref;
use std::sync::Arc;

use tokio::sync::OwnedSemaphorePermit;

use super::pool::SessionPool;
use crate::backend::{BackendError, BackendSession};

enum Lease {
    /// Opened for this scope only; closed on release.
    Ephemeral,
    /// Checked out of a pool; returned (or discarded) on release.
    Pooled {
        pool: Arc<SessionPool>,
        permit: Option<OwnedSemaphorePermit>,
    },
}

/// A session held for the duration of one scope.
pub struct ScopedSession {
    session: Arc<dyn BackendSession>,
    lease: Lease,
    broken: bool,
    released: bool,
}

impl ScopedSession {
    pub(crate) fn ephemeral(session: Arc<dyn BackendSession>) -> Self {
        Self {
            session,
            lease: Lease::Ephemeral,
            broken: false,
            released: false,
        }
    }

    pub(crate) fn pooled(
        session: Arc<dyn BackendSession>,
        pool: Arc<SessionPool>,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        Self {
            session,
            lease: Lease::Pooled {
                pool,
                permit: Some(permit),
            },
            broken: false,
            released: false,
        }
    }

    /// Whether the session came from a pool.
    pub fn is_pooled(&self) -> bool {
        matches!(self.lease, Lease::Pooled { .. })
    }

    /// Never return this session to a pool.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    /// Mark the session broken if `result` is a connection-level failure.
    pub fn track<T>(&mut self, result: &Result<T, BackendError>) {
        if let Err(e) = result {
            if e.is_connection_failure() {
                self.broken = true;
            }
        }
    }

    /// Release the session, awaiting any close.
    pub async fn release(mut self) {
        self.released = true;
        match &mut self.lease {
            Lease::Ephemeral => self.session.close().await,
            Lease::Pooled { pool, permit } => {
                if self.broken {
                    self.session.close().await;
                    tracing::debug!(backend = self.session.backend(), "discarded broken pooled session");
                } else if let Some(rejected) = pool.check_in(Arc::clone(&self.session)) {
                    rejected.close().await;
                }
                drop(permit.take());
            }
        }
    }

    /// Synchronous release for `Drop`. The session is closed in the
    /// background; a pooled slot frees only after the close finishes.
    fn release_in_background(&mut self) {
        let session = Arc::clone(&self.session);
        let permit = match &mut self.lease {
            Lease::Ephemeral => None,
            Lease::Pooled { permit, .. } => permit.take(),
        };
        if self.is_pooled() {
            tracing::debug!(
                backend = session.backend(),
                "pooled session dropped without release, closing"
            );
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    session.close().await;
                    // The pool slot frees only once the connection is gone.
                    drop(permit);
                });
            }
            Err(_) => {
                tracing::warn!(
                    backend = session.backend(),
                    "no runtime available to close dropped session"
                );
            }
        }
    }
}

impl Deref for ScopedSession {
    type Target = dyn BackendSession;

    fn deref(&self) -> &Self::Target {
        self.session.as_ref()
    }
}

impl Drop for ScopedSession {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            self.release_in_background();
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
