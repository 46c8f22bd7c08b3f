use std::collections::HashMap;
use std::sync::Arc;
use std::sync::PoisonError;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::entity::CommandError;
use super::entity::EntityCommand;
use super::integration::FromIntegrationReceiver;
use super::integration::FromIntegrationSender;
use super::integration::Integration;
use super::integration::IntegrationContext;
use super::integration::SetupError;
use super::integration::ToIntegrationSender;
use super::message::FromIntegrationMessage;
use super::message::ToIntegrationMessage;
use super::state::EntityRecord;
use super::state::State;

/// litterrobotd engine
///
/// This structure handles the flow of events from integrations, routes
/// commands to the integration owning an entity, and maintains a view of the
/// world with State.
pub struct Engine {
    /// Centralized state snapshot (readers load the Arc, writer stores a new one)
    state: ArcSwap<State>,

    /// Map of entity_id -> integration name for routing messages
    entity_integration_map: std::sync::Mutex<HashMap<String, String>>,

    /// Communication channels to integrations (for commands)
    integration_channels: std::sync::Mutex<HashMap<String, ToIntegrationSender>>,

    /// Receive messages from integrations (events)
    message_rx: Mutex<FromIntegrationReceiver>,

    /// Sender for integrations to report events back to the engine
    message_tx: FromIntegrationSender,

    /// Handles for integration tasks
    integration_handles: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

/// Capacity for the integration→engine message channel
/// Provides backpressure when integrations send faster than the engine can process
const FROM_INTEGRATION_CHANNEL_SIZE: usize = 1024;

/// First wait before retrying an integration that was not ready
const SETUP_RETRY_INITIAL: Duration = Duration::from_secs(5);

/// Upper bound for the setup retry backoff
const SETUP_RETRY_MAX: Duration = Duration::from_secs(80);

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("No integration found for entity: {0}")]
    UnknownEntity(String),

    #[error("Integration channel not found: {0}")]
    UnknownIntegration(String),

    #[error("Integration '{0}' is not running")]
    IntegrationStopped(String),

    #[error(transparent)]
    Command(#[from] CommandError),
}

impl Engine {
    /// Create a new Engine instance
    pub fn new() -> Self {
        let (message_tx, message_rx) = mpsc::channel(FROM_INTEGRATION_CHANNEL_SIZE);
        Self {
            state: ArcSwap::new(Arc::default()),
            entity_integration_map: std::sync::Mutex::new(HashMap::new()),
            integration_channels: std::sync::Mutex::new(HashMap::new()),
            message_rx: Mutex::new(message_rx),
            message_tx,
            integration_handles: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Register integrations from configuration
    ///
    /// Runs every registered integration factory against the config and
    /// registers whatever they produce.
    pub fn register_integrations_from_config(&mut self, cfg: &crate::config::Config) {
        let ctx = IntegrationContext { config: cfg };
        for constr in super::integration::REGISTRY {
            let integrations = match constr(&ctx) {
                Ok(i) => i,
                Err(e) => {
                    error!("failed to setup integration: {:#}", e);
                    continue;
                }
            };
            for integration in integrations {
                let name = integration.name().to_string();
                self.register_integration(name, integration);
            }
        }
    }

    /// Register an integration with the engine
    ///
    /// This spawns the integration in a background task, wires up channels,
    /// and starts its setup process. Setup is retried with backoff for as
    /// long as the integration reports [`SetupError::NotReady`].
    pub fn register_integration(&mut self, name: String, mut integration: Box<dyn Integration>) {
        let (to_integration_tx, mut to_integration_rx) = mpsc::unbounded_channel();
        let from_integration_tx = self.message_tx.clone();

        self.integration_channels
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.clone(), to_integration_tx);

        // Spawn integration task
        let handle = tokio::spawn(async move {
            let mut retry_in = SETUP_RETRY_INITIAL;
            loop {
                match integration.setup(from_integration_tx.clone()).await {
                    Ok(()) => break,
                    Err(SetupError::NotReady(e)) => {
                        warn!(
                            "Integration '{}' not ready ({}), retrying in {:?}",
                            name, e, retry_in
                        );
                        tokio::time::sleep(retry_in).await;
                        retry_in = (retry_in * 2).min(SETUP_RETRY_MAX);
                    }
                    Err(e @ SetupError::Failed(_)) => {
                        error!("Integration '{}' setup failed: {}", name, e);
                        return;
                    }
                }
            }
            info!("Integration '{}' set up", name);

            // Process commands from engine
            while let Some(msg) = to_integration_rx.recv().await {
                if let Err(e) = integration.handle_message(msg).await {
                    warn!("Integration '{}' failed to handle message: {:#}", name, e);
                }
            }

            if let Err(e) = integration.shutdown().await {
                warn!("Integration '{}' shutdown failed: {:#}", name, e);
            }
        });

        self.integration_handles
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }

    /// Send a command to the integration owning `entity_id`
    ///
    /// Returns a receiver that resolves once the integration finished the command.
    pub fn send_command(
        &self,
        entity_id: &str,
        command: EntityCommand,
    ) -> Result<oneshot::Receiver<Result<(), CommandError>>, EngineError> {
        // Route to the integration that owns this entity
        let integration_name = self
            .entity_integration_map
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(entity_id)
            .cloned()
            .ok_or_else(|| EngineError::UnknownEntity(entity_id.to_string()))?;

        let tx = self
            .integration_channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&integration_name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownIntegration(integration_name.clone()))?;

        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(ToIntegrationMessage::EntityCommand {
            entity_id: entity_id.to_string(),
            command,
            reply: Some(reply_tx),
        })
        .map_err(|_| EngineError::IntegrationStopped(integration_name))?;

        Ok(reply_rx)
    }

    /// Send a command and wait for its outcome
    pub async fn command(
        &self,
        entity_id: &str,
        command: EntityCommand,
    ) -> Result<(), EngineError> {
        let reply = self.send_command(entity_id, command)?;
        match reply.await {
            Ok(result) => result.map_err(EngineError::from),
            Err(_) => Err(EngineError::IntegrationStopped(entity_id.to_string())),
        }
    }

    /// Run the engine's main event loop
    ///
    /// Processes incoming events from integrations and updates state.
    pub async fn run(&self) {
        info!("Engine starting");

        // Main event loop - only receives FromIntegration messages
        let mut rx = self.message_rx.lock().await;
        while let Some(msg) = rx.recv().await {
            self.handle_event(msg);
        }

        info!("Engine shutting down");
    }

    /// Get a snapshot of the current engine state.
    ///
    /// Clones the `Arc` (atomic refcount bump), essentially free.
    pub fn state_snapshot(&self) -> Arc<State> {
        self.state.load_full()
    }

    /// Stop all integrations and wait for them to unload
    ///
    /// Commands already handed to an integration finish first.
    pub async fn shutdown(&self) {
        // Closing the command channels ends each integration's loop
        self.integration_channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        let handles: Vec<JoinHandle<()>> = self
            .integration_handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Integration task ended abnormally: {}", e);
            }
        }
    }

    /// Handle an event from an integration
    fn handle_event(&self, msg: FromIntegrationMessage) {
        match msg {
            FromIntegrationMessage::EntityDiscovered {
                entity_id,
                entity,
                integration_name,
            } => {
                info!(
                    "Entity discovered: {} (from {})",
                    entity_id, integration_name
                );

                let record = EntityRecord {
                    unique_id: entity.unique_id(),
                    name: entity.name(),
                    platform: entity.platform(),
                    integration: integration_name.clone(),
                    device: entity.device_info(),
                    state: None,
                };

                {
                    let mut state = State::clone(&self.state.load());
                    if let Some(existing) = state.entities.get(&entity_id) {
                        if existing.unique_id != record.unique_id {
                            warn!(
                                "Entity id {} already used by {}, replacing with {}",
                                entity_id, existing.unique_id, record.unique_id
                            );
                        }
                    }
                    state.entities.insert(entity_id.clone(), record);
                    self.state.store(Arc::new(state));
                }

                // Record which integration owns this entity for command routing.
                self.entity_integration_map
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(entity_id, integration_name);
            }
            FromIntegrationMessage::EntityRemoved { entity_id } => {
                info!("Entity removed: {}", entity_id);

                {
                    let mut state = State::clone(&self.state.load());
                    state.entities.remove(&entity_id);
                    self.state.store(Arc::new(state));
                }

                self.entity_integration_map
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&entity_id);
            }
            FromIntegrationMessage::StateChanged {
                entity_id,
                state: entity_state,
            } => {
                debug!(
                    "State changed: {} -> {} (available={})",
                    entity_id, entity_state.state, entity_state.available
                );

                let mut state = State::clone(&self.state.load());
                match state.entities.get_mut(&entity_id) {
                    Some(record) => {
                        record.state = Some(entity_state);
                        self.state.store(Arc::new(state));
                    }
                    None => warn!("State change for unknown entity: {}", entity_id),
                }
            }
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::engine::entity::DeviceInfo;
    use crate::engine::entity::Entity;
    use crate::engine::entity::EntityState;
    use crate::engine::entity::Platform;

    struct Lamp;

    #[async_trait]
    impl Entity for Lamp {
        fn unique_id(&self) -> String {
            "lamp-1".to_string()
        }

        fn name(&self) -> String {
            "Desk Lamp".to_string()
        }

        fn platform(&self) -> Platform {
            Platform::Switch
        }

        fn available(&self) -> bool {
            true
        }

        fn device_info(&self) -> DeviceInfo {
            DeviceInfo {
                identifiers: vec![("test".to_string(), "lamp-1".to_string())],
                name: "Desk Lamp".to_string(),
                manufacturer: None,
                model: None,
            }
        }

        fn state(&self) -> EntityState {
            EntityState::new("on", true)
        }
    }

    #[test]
    fn test_state_follows_entity_events() {
        let engine = Engine::new();

        engine.handle_event(FromIntegrationMessage::EntityDiscovered {
            entity_id: "switch.desk_lamp".to_string(),
            entity: Arc::new(Lamp),
            integration_name: "test".to_string(),
        });
        let snapshot = engine.state_snapshot();
        let record = &snapshot.entities["switch.desk_lamp"];
        assert_eq!(record.unique_id, "lamp-1");
        assert!(record.state.is_none());

        engine.handle_event(FromIntegrationMessage::StateChanged {
            entity_id: "switch.desk_lamp".to_string(),
            state: EntityState::new("on", true),
        });
        let snapshot = engine.state_snapshot();
        assert_eq!(
            snapshot.entities["switch.desk_lamp"]
                .state
                .as_ref()
                .unwrap()
                .state,
            "on"
        );

        engine.handle_event(FromIntegrationMessage::EntityRemoved {
            entity_id: "switch.desk_lamp".to_string(),
        });
        assert!(engine.state_snapshot().entities.is_empty());
    }

    /// Integration owning one `Lamp`; not ready for the first `failures` setups
    struct LampIntegration {
        failures: usize,
        setups: Arc<std::sync::atomic::AtomicUsize>,
    }

    #[async_trait]
    impl Integration for LampIntegration {
        fn name(&self) -> &str {
            "lamps"
        }

        async fn setup(&mut self, tx: FromIntegrationSender) -> Result<(), SetupError> {
            let attempt = self
                .setups
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if attempt < self.failures {
                return Err(SetupError::NotReady("bridge offline".to_string()));
            }
            tx.send(FromIntegrationMessage::EntityDiscovered {
                entity_id: "switch.desk_lamp".to_string(),
                entity: Arc::new(Lamp),
                integration_name: "lamps".to_string(),
            })
            .await
            .map_err(|e| SetupError::Failed(e.to_string()))
        }

        async fn handle_message(&mut self, msg: ToIntegrationMessage) -> anyhow::Result<()> {
            let ToIntegrationMessage::EntityCommand { command, reply, .. } = msg;
            if let Some(reply) = reply {
                let result = match command {
                    EntityCommand::TurnOff => Ok(()),
                    other => Err(CommandError::NotImplemented(other.name().to_string())),
                };
                let _ = reply.send(result);
            }
            Ok(())
        }

        async fn shutdown(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_setup_retried_with_backoff() {
        let setups = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let mut engine = Engine::new();
        engine.register_integration(
            "lamps".to_string(),
            Box::new(LampIntegration {
                failures: 2,
                setups: setups.clone(),
            }),
        );
        let engine = Arc::new(engine);
        let runner = tokio::spawn({
            let engine = engine.clone();
            async move { engine.run().await }
        });

        // First attempt at once, then after 5s, then 10s later
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(setups.load(std::sync::atomic::Ordering::SeqCst), 1);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(setups.load(std::sync::atomic::Ordering::SeqCst), 2);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(setups.load(std::sync::atomic::Ordering::SeqCst), 3);

        assert!(engine.state_snapshot().entities.contains_key("switch.desk_lamp"));
        engine.command("switch.desk_lamp", EntityCommand::TurnOff).await.unwrap();
        let err = engine
            .command("switch.desk_lamp", EntityCommand::Start)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Command(CommandError::NotImplemented(_))
        ));

        engine.shutdown().await;
        runner.abort();
    }

    #[test]
    fn test_command_for_unknown_entity() {
        let engine = Engine::new();
        let err = engine
            .send_command("switch.nope", EntityCommand::TurnOff)
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownEntity(_)));
    }
}
