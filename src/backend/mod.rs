//! Backend connectivity: transports, the protocol session, and the factory
//! seam used by the rest of the gateway.

pub mod errors;
pub mod factory;
pub mod session;
pub mod sse;
pub mod transport;
pub mod types;

#[cfg(test)]
pub mod testing;

pub use errors::BackendError;
pub use factory::{create_factory, SessionFactory, TransportFactory};
pub use session::{BackendSession, McpSession};
pub use types::{is_content_block, is_multimodal_block, ResourceDefinition, ServerInfo, ToolDefinition};
