//! Common data and behaviour of every Litter-Robot entity.

use std::future::Future;
use std::sync::Arc;

use crate::account::AccountError;
use crate::account::Robot;
use crate::account::RobotData;
use crate::engine::DeviceInfo;
use crate::engine::EntityState;
use crate::time::ZonedTime;

use super::hub::Hub;
use super::DOMAIN;

const MANUFACTURER: &str = "Litter-Robot";

/// What an entity represents; its label is part of the entity's name and id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
pub enum EntityType {
    #[strum(serialize = "Waste Drawer")]
    WasteDrawer,
    #[strum(serialize = "Sleep Mode Start Time")]
    SleepModeStartTime,
    #[strum(serialize = "Night Light")]
    NightLight,
    #[strum(serialize = "Panel Lockout")]
    PanelLockout,
    #[strum(serialize = "Sleep Mode")]
    SleepMode,
    #[strum(serialize = "Litter Box")]
    LitterBox,
}

/// Hardware variants, recognised by serial number prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Model {
    LitterRobot3Connect,
    Unknown,
}

/// Known serial prefixes. Checked in order, so longer prefixes go first.
const KNOWN_MODELS: &[(&str, Model)] = &[("LR3C", Model::LitterRobot3Connect)];

impl Model {
    pub fn from_serial(serial: &str) -> Self {
        KNOWN_MODELS
            .iter()
            .find(|(prefix, _)| serial.starts_with(prefix))
            .map(|(_, model)| *model)
            .unwrap_or(Model::Unknown)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Model::LitterRobot3Connect => "Litter-Robot 3 Connect",
            Model::Unknown => "Other Litter-Robot Connected Device",
        }
    }
}

/// A robot handle paired with an entity type and the hub that owns the robot.
pub struct LitterRobotEntity {
    robot: Arc<dyn Robot>,
    entity_type: EntityType,
    hub: Arc<Hub>,
}

impl LitterRobotEntity {
    pub fn new(robot: Arc<dyn Robot>, entity_type: EntityType, hub: Arc<Hub>) -> Self {
        Self {
            robot,
            entity_type,
            hub,
        }
    }

    pub fn robot(&self) -> &dyn Robot {
        self.robot.as_ref()
    }

    /// Live robot data
    pub fn data(&self) -> RobotData {
        self.robot.data()
    }

    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    pub fn name(&self) -> String {
        format!("{} {}", self.robot.data().name, self.entity_type)
    }

    pub fn unique_id(&self) -> String {
        format!("{}-{}", self.robot.data().serial, self.entity_type)
    }

    pub fn available(&self) -> bool {
        self.hub.logged_in()
    }

    pub fn device_info(&self) -> DeviceInfo {
        let data = self.robot.data();
        DeviceInfo {
            identifiers: vec![(DOMAIN.to_string(), data.serial.clone())],
            name: data.name,
            manufacturer: Some(MANUFACTURER.to_string()),
            model: Some(Model::from_serial(&data.serial).label().to_string()),
        }
    }

    /// Start rendering a state, with availability filled in.
    pub fn render(&self, state: impl Into<String>) -> EntityState {
        EntityState::new(state, self.available())
    }

    /// Perform an action and refresh the robot data once it had time to settle.
    ///
    /// The API only reflects a change some seconds after it was accepted.
    pub async fn perform_action_and_refresh<F>(&self, action: F) -> Result<(), AccountError>
    where
        F: Future<Output = Result<(), AccountError>>,
    {
        action.await?;
        tokio::time::sleep(self.hub.refresh_wait()).await;
        self.hub.refresh().await;
        Ok(())
    }

    /// Parse a time of day and qualify it with the default timezone.
    pub fn parse_time_at_default_timezone(&self, time_str: &str) -> Option<ZonedTime> {
        ZonedTime::parse(time_str, self.hub.timezone())
    }
}
