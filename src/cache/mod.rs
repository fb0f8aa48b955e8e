//! Capability Cache: immutable per-backend snapshots of operations,
//! resources, and backend identity.

pub mod capability;
pub mod description;
pub mod types;

pub use capability::{is_text_mime, load_snapshot, CapabilityCache};
pub use description::{resources_overview, tools_overview, truncate_chars};
pub use types::{BackendInfo, BackendSnapshot, LoadReport, OperationInfo, ResourceInfo};
