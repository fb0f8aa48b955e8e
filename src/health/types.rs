//! Health records and snapshots.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::GatewayConfig;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    #[default]
    Unknown,
    Healthy,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Unknown => "unknown",
            HealthStatus::Healthy => "healthy",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }
}

/// Health of one backend. Copies handed out are read-only snapshots.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HealthRecord {
    pub status: HealthStatus,
    pub consecutive_failures: u32,
    pub last_check: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl HealthRecord {
    /// Apply one successful probe. Returns the status before the update.
    pub fn record_success(&mut self, at: DateTime<Utc>) -> HealthStatus {
        let previous = self.status;
        self.status = HealthStatus::Healthy;
        self.consecutive_failures = 0;
        self.last_check = Some(at);
        self.last_success = Some(at);
        self.last_error = None;
        previous
    }

    /// Apply one failed probe. The status only flips to unhealthy once
    /// `threshold` consecutive failures have accumulated.
    pub fn record_failure(&mut self, at: DateTime<Utc>, error: String, threshold: u32) -> HealthStatus {
        let previous = self.status;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_check = Some(at);
        self.last_error = Some(error);
        if self.consecutive_failures >= threshold {
            self.status = HealthStatus::Unhealthy;
        }
        previous
    }
}

/// Probe cadence and hysteresis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthSettings {
    pub interval: Duration,
    pub timeout: Duration,
    pub failure_threshold: u32,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(5),
            failure_threshold: 2,
        }
    }
}

impl HealthSettings {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.health_check_interval.max(1)),
            timeout: Duration::from_secs(config.health_check_timeout.max(1)),
            failure_threshold: config.health_check_failure_threshold.max(1),
        }
    }
}

/// Emitted when a backend becomes healthy after being unhealthy or unknown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryEvent {
    pub backend: String,
    pub previous: HealthStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthSummary {
    pub total: usize,
    pub healthy: usize,
    pub unhealthy: usize,
    pub unknown: usize,
}

/// Aggregate view served to administrative callers.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HealthSnapshot {
    pub running: bool,
    pub summary: HealthSummary,
    pub servers: BTreeMap<String, HealthRecord>,
}

impl HealthSnapshot {
    pub fn new(running: bool, servers: BTreeMap<String, HealthRecord>) -> Self {
        let mut summary = HealthSummary {
            total: servers.len(),
            ..HealthSummary::default()
        };
        for record in servers.values() {
            match record.status {
                HealthStatus::Healthy => summary.healthy += 1,
                HealthStatus::Unhealthy => summary.unhealthy += 1,
                HealthStatus::Unknown => summary.unknown += 1,
            }
        }
        Self {
            running,
            summary,
            servers,
        }
    }
}
