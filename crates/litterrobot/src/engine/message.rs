//! Type-safe message system for litterrobotd
//!
//! Messages are split by direction to enforce correct usage at compile time:
//! - `FromIntegrationMessage`: Events from integrations to the engine
//! - `ToIntegrationMessage`: Commands from the engine to integrations

use std::sync::Arc;

use tokio::sync::oneshot;

use super::entity::CommandError;
use super::entity::Entity;
use super::entity::EntityCommand;
use super::entity::EntityState;

/// Messages FROM integrations TO the engine (events/state updates)
pub enum FromIntegrationMessage {
    /// An entity was discovered and registered
    EntityDiscovered {
        entity_id: String,
        entity: Arc<dyn Entity>,
        integration_name: String,
    },

    /// An entity was removed (integration unloaded, etc.)
    EntityRemoved { entity_id: String },

    /// An entity rendered a new state
    StateChanged {
        entity_id: String,
        state: EntityState,
    },
}

impl std::fmt::Debug for FromIntegrationMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FromIntegrationMessage::EntityDiscovered {
                entity_id,
                integration_name,
                ..
            } => f
                .debug_struct("EntityDiscovered")
                .field("entity_id", entity_id)
                .field("integration_name", integration_name)
                .field("entity", &"<entity>")
                .finish(),
            FromIntegrationMessage::EntityRemoved { entity_id } => f
                .debug_struct("EntityRemoved")
                .field("entity_id", entity_id)
                .finish(),
            FromIntegrationMessage::StateChanged { entity_id, state } => f
                .debug_struct("StateChanged")
                .field("entity_id", entity_id)
                .field("state", &state.state)
                .field("available", &state.available)
                .finish(),
        }
    }
}

/// Where the outcome of a command is reported
pub type CommandReply = oneshot::Sender<Result<(), CommandError>>;

/// Messages FROM the engine TO integrations (commands)
#[derive(Debug)]
pub enum ToIntegrationMessage {
    /// Command for one of the integration's entities
    EntityCommand {
        entity_id: String,
        command: EntityCommand,
        reply: Option<CommandReply>,
    },
}
