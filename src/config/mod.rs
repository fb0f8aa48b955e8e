//! Gateway configuration: model, discovery, and loading.

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::ConfigError;
pub use loader::{find_config_path, load_gateway_config, parse_gateway_config};
pub use types::{BackendConfig, ConnectionMode, GatewayConfig, OperationNames, TransportKind};
