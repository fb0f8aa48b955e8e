//! Backend health: periodic probes with hysteresis.

pub mod monitor;
pub mod types;

pub use monitor::HealthMonitor;
pub use types::{HealthRecord, HealthSettings, HealthSnapshot, HealthStatus, HealthSummary, RecoveryEvent};
