//! Entity abstraction for litterrobotd
//!
//! All entities (sensors, switches, vacuums) implement the Entity trait. An
//! entity renders its state on demand from whatever live data it wraps; the
//! engine only keeps the last rendered [`EntityState`].

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

use crate::account::AccountError;

/// Platform an entity belongs to
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display, strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Platform {
    Sensor,
    Switch,
    Vacuum,
}

/// The physical device an entity belongs to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceInfo {
    pub identifiers: Vec<(String, String)>,
    pub name: String,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
}

/// Rendered state of an entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityState {
    pub state: String,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_of_measurement: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<String>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub attributes: Map<String, Value>,
}

impl EntityState {
    pub fn new(state: impl Into<String>, available: bool) -> Self {
        Self {
            state: state.into(),
            available,
            icon: None,
            unit_of_measurement: None,
            device_class: None,
            attributes: Map::new(),
        }
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit_of_measurement = Some(unit.into());
        self
    }

    pub fn with_device_class(mut self, device_class: Option<&str>) -> Self {
        self.device_class = device_class.map(String::from);
        self
    }

    pub fn with_attribute(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }
}

/// A user or automation request for an entity.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum EntityCommand {
    TurnOn {
        #[serde(default)]
        params: Map<String, Value>,
    },
    TurnOff,
    Start,
    SendCommand {
        name: String,
        #[serde(default)]
        params: Map<String, Value>,
    },
}

impl EntityCommand {
    pub fn name(&self) -> &'static str {
        match self {
            EntityCommand::TurnOn { .. } => "turn_on",
            EntityCommand::TurnOff => "turn_off",
            EntityCommand::Start => "start",
            EntityCommand::SendCommand { .. } => "send_command",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Command '{0}' is not implemented")]
    NotImplemented(String),

    #[error("{platform} entities do not support {command}")]
    NotSupported {
        platform: Platform,
        command: &'static str,
    },

    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    #[error("Invalid command parameters: {0}")]
    InvalidParams(String),

    #[error(transparent)]
    Device(#[from] AccountError),
}

/// Base trait that all entities must implement
#[async_trait]
pub trait Entity: Send + Sync {
    /// Stable identifier, unique across every entity
    fn unique_id(&self) -> String;

    /// Human-readable name
    fn name(&self) -> String;

    /// Return the platform type of this entity
    fn platform(&self) -> Platform;

    fn available(&self) -> bool;

    fn device_info(&self) -> DeviceInfo;

    /// Render the current state
    fn state(&self) -> EntityState;

    /// Execute a command. Entities without controls reject everything.
    async fn handle_command(&self, command: EntityCommand) -> Result<(), CommandError> {
        Err(CommandError::NotSupported {
            platform: self.platform(),
            command: command.name(),
        })
    }

    /// Engine-facing id, e.g. "sensor.kitty_waste_drawer"
    fn entity_id(&self) -> String {
        format!("{}.{}", self.platform(), slugify(&self.name()))
    }
}

/// Lowercase `s` and collapse every run of non-alphanumerics into one `_`.
pub fn slugify(s: &str) -> String {
    let mut slug = String::with_capacity(s.len());
    for c in s.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
        } else if !slug.is_empty() && !slug.ends_with('_') {
            slug.push('_');
        }
    }
    while slug.ends_with('_') {
        slug.pop();
    }
    slug
}
