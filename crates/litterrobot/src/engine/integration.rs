use async_trait::async_trait;
use linkme::distributed_slice;
use tokio::sync::mpsc;

use super::message::FromIntegrationMessage;
use super::message::ToIntegrationMessage;
use crate::config::Config;

/// Channel types for messages FROM integrations TO the engine
/// These are bounded channels to provide backpressure
pub type FromIntegrationSender = mpsc::Sender<FromIntegrationMessage>;
pub type FromIntegrationReceiver = mpsc::Receiver<FromIntegrationMessage>;

/// Channel types for messages FROM the engine TO integrations (unbounded - engine must not block)
pub type ToIntegrationSender = mpsc::UnboundedSender<ToIntegrationMessage>;

/// Result type for integration factory functions
///
/// One factory may produce several integrations, e.g. one per configured account.
pub type IntegrationFactoryResult = anyhow::Result<Vec<Box<dyn Integration>>>;

pub struct IntegrationContext<'a> {
    pub config: &'a Config,
}

#[distributed_slice]
pub static REGISTRY: [fn(&IntegrationContext) -> IntegrationFactoryResult];

/// Why an integration could not be set up.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    /// Temporary failure; the engine retries setup later
    #[error("Integration not ready: {0}")]
    NotReady(String),

    /// Permanent failure; the integration stays unloaded
    #[error("Integration setup failed: {0}")]
    Failed(String),
}

/// Integration trait that all integrations must implement
#[async_trait]
pub trait Integration: Send + Sync {
    /// Get the name/identifier of this integration
    fn name(&self) -> &str;

    /// Set up the integration - log in, discover entities, start polling, etc.
    ///
    /// The integration receives a sender to report events back to the engine
    /// (discovery, state changes, etc.). Setup may be called again after it
    /// returned [`SetupError::NotReady`].
    async fn setup(&mut self, tx: FromIntegrationSender) -> Result<(), SetupError>;

    /// Handle a command from the engine
    async fn handle_message(&mut self, msg: ToIntegrationMessage) -> anyhow::Result<()>;

    /// Shut down the integration, unregistering its entities
    async fn shutdown(&mut self) -> anyhow::Result<()>;
}
