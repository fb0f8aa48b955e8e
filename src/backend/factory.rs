//! Session construction seam.
//!
//! Everything above the backend layer opens sessions through a
//! `SessionFactory`, so the connection manager, cache, and health monitor run
//! unchanged against scripted sessions in tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::errors::BackendError;
use super::session::{BackendSession, McpSession};
use crate::config::{BackendConfig, GatewayConfig};

/// Opens handshaked sessions.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn connect(
        &self,
        name: &str,
        config: &BackendConfig,
    ) -> Result<Box<dyn BackendSession>, BackendError>;
}

/// Factory for real stdio/HTTP backends.
pub struct TransportFactory {
    init_timeout: Duration,
    call_timeout: Duration,
}

impl TransportFactory {
    pub fn new(init_timeout: Duration, call_timeout: Duration) -> Self {
        Self {
            init_timeout,
            call_timeout,
        }
    }
}

#[async_trait]
impl SessionFactory for TransportFactory {
    async fn connect(
        &self,
        name: &str,
        config: &BackendConfig,
    ) -> Result<Box<dyn BackendSession>, BackendError> {
        let session = McpSession::connect(name, config, self.init_timeout, self.call_timeout).await?;
        Ok(Box::new(session))
    }
}

/// Build the production factory from gateway settings.
pub fn create_factory(config: &GatewayConfig) -> Arc<dyn SessionFactory> {
    Arc::new(TransportFactory::new(config.init_timeout(), config.call_timeout()))
}
