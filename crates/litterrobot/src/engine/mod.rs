pub mod entity;
// Private module - allowed by clippy.toml allow-private-module-inception
#[allow(clippy::module_inception)]
mod engine;
mod integration;
mod message;
pub mod state;

pub use engine::Engine;
pub use engine::EngineError;
pub use entity::CommandError;
pub use entity::DeviceInfo;
pub use entity::Entity;
pub use entity::EntityCommand;
pub use entity::EntityState;
pub use entity::Platform;
pub use integration::FromIntegrationSender;
pub use integration::Integration;
pub use integration::IntegrationContext;
pub use integration::IntegrationFactoryResult;
pub use integration::SetupError;
pub use integration::REGISTRY as INTEGRATION_REGISTRY;
pub use message::CommandReply;
pub use message::FromIntegrationMessage;
pub use message::ToIntegrationMessage;
pub use state::EntityRecord;
pub use state::State;
