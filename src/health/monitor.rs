//! Health Monitor.
//!
//! A background loop probes every monitored backend on a fixed interval.
//! Probes open their own ephemeral session and ping it under a timeout, so
//! they never compete with live traffic for pooled sessions.
//!
//! Status per backend follows `unknown → healthy ⇄ unhealthy`, with the
//! flip to unhealthy delayed until `failure_threshold` consecutive failures.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::types::{HealthRecord, HealthSettings, HealthSnapshot, HealthStatus, RecoveryEvent};
use crate::backend::BackendError;
use crate::connection::ConnectionManager;

struct LoopHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

pub struct HealthMonitor {
    manager: Arc<ConnectionManager>,
    settings: RwLock<HealthSettings>,
    records: RwLock<BTreeMap<String, HealthRecord>>,
    running: AtomicBool,
    handle: tokio::sync::Mutex<Option<LoopHandle>>,
    events: mpsc::UnboundedSender<RecoveryEvent>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<RecoveryEvent>>>,
}

impl HealthMonitor {
    pub fn new(manager: Arc<ConnectionManager>, settings: HealthSettings) -> Self {
        let (events, receiver) = mpsc::unbounded_channel();
        Self {
            manager,
            settings: RwLock::new(settings),
            records: RwLock::new(BTreeMap::new()),
            running: AtomicBool::new(false),
            handle: tokio::sync::Mutex::new(None),
            events,
            receiver: Mutex::new(Some(receiver)),
        }
    }

    pub fn settings(&self) -> HealthSettings {
        *self.settings.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// New settings apply from the next `start`.
    pub fn set_settings(&self, settings: HealthSettings) {
        *self.settings.write().unwrap_or_else(PoisonError::into_inner) = settings;
    }

    /// Recovery notifications. Only one consumer; later calls return `None`.
    pub fn take_recovery_events(&self) -> Option<mpsc::UnboundedReceiver<RecoveryEvent>> {
        self.receiver.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    /// Start monitoring `backend` with status `unknown`. No-op if present.
    pub fn add_backend(&self, backend: &str) {
        self.records_mut()
            .entry(backend.to_string())
            .or_default();
    }

    pub fn remove_backend(&self, backend: &str) -> bool {
        self.records_mut().remove(backend).is_some()
    }

    pub fn backends(&self) -> Vec<String> {
        self.records().keys().cloned().collect()
    }

    pub fn get_status(&self, backend: &str) -> Option<HealthRecord> {
        self.records().get(backend).cloned()
    }

    pub fn get_all_statuses(&self) -> BTreeMap<String, HealthRecord> {
        self.records().clone()
    }

    pub fn is_healthy(&self, backend: &str) -> bool {
        self.records()
            .get(backend)
            .is_some_and(|r| r.status == HealthStatus::Healthy)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot::new(self.is_running(), self.get_all_statuses())
    }

    // ── Loop ────────────────────────────────────────────────────────────

    /// Spawn the periodic loop. The first round runs immediately.
    pub async fn start(self: &Arc<Self>) {
        let mut handle = self.handle.lock().await;
        if handle.is_some() {
            tracing::warn!("health monitor already running");
            return;
        }

        let settings = self.settings();
        let (stop, mut stopped) = watch::channel(false);
        let monitor = Arc::clone(self);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(settings.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => monitor.check_all().await,
                    changed = stopped.changed() => {
                        if changed.is_err() || *stopped.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        self.running.store(true, Ordering::SeqCst);
        *handle = Some(LoopHandle { stop, task });
        tracing::info!(
            interval_secs = settings.interval.as_secs(),
            timeout_secs = settings.timeout.as_secs(),
            failure_threshold = settings.failure_threshold,
            backends = self.records().len(),
            "health monitor started"
        );
    }

    /// Stop the loop and wait for the current round to finish.
    pub async fn stop(&self) {
        let Some(LoopHandle { stop, task }) = self.handle.lock().await.take() else {
            return;
        };
        let _ = stop.send(true);
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "health monitor task ended abnormally");
        }
        self.running.store(false, Ordering::SeqCst);
        tracing::info!("health monitor stopped");
    }

    /// Probe every monitored backend concurrently.
    pub async fn check_all(&self) {
        let backends = self.backends();
        if backends.is_empty() {
            return;
        }
        tracing::debug!(count = backends.len(), "running health checks");
        join_all(backends.iter().map(|b| self.check_backend(b))).await;
    }

    /// Probe one backend and fold the outcome into its record.
    /// Returns whether the probe succeeded.
    pub async fn check_backend(&self, backend: &str) -> bool {
        let settings = self.settings();
        let outcome = match tokio::time::timeout(settings.timeout, self.probe(backend)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("Timeout after {}s", settings.timeout.as_secs_f64())),
        };
        self.record(backend, outcome, settings.failure_threshold)
    }

    async fn probe(&self, backend: &str) -> Result<(), BackendError> {
        let mut session = self.manager.acquire_ephemeral(backend).await?;
        let result = session.ping().await;
        session.track(&result);
        session.release().await;
        result
    }

    fn record(&self, backend: &str, outcome: Result<(), String>, threshold: u32) -> bool {
        let now = Utc::now();
        let mut records = self.records_mut();
        // Removed while the probe was in flight.
        let Some(record) = records.get_mut(backend) else {
            return outcome.is_ok();
        };

        match outcome {
            Ok(()) => {
                let previous = record.record_success(now);
                drop(records);
                tracing::debug!(backend, "health check passed");
                if previous != HealthStatus::Healthy {
                    tracing::info!(backend, previous = previous.as_str(), "backend is healthy");
                    let _ = self.events.send(RecoveryEvent {
                        backend: backend.to_string(),
                        previous,
                    });
                }
                true
            }
            Err(error) => {
                let previous = record.record_failure(now, error.clone(), threshold);
                let (status, failures) = (record.status, record.consecutive_failures);
                drop(records);
                if status == HealthStatus::Unhealthy && previous != HealthStatus::Unhealthy {
                    tracing::warn!(backend, failures, error = %error, "backend marked unhealthy");
                } else {
                    tracing::warn!(backend, failures, error = %error, "health check failed");
                }
                false
            }
        }
    }

    fn records(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, HealthRecord>> {
        self.records.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn records_mut(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, HealthRecord>> {
        self.records.write().unwrap_or_else(PoisonError::into_inner)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
