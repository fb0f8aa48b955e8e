//! Session acquisition: per-call isolation or bounded pools, always through
//! a scoped guard.

pub mod guard;
pub mod manager;
pub mod pool;

pub use guard::ScopedSession;
pub use manager::ConnectionManager;
pub use pool::{PoolStats, SessionPool};
