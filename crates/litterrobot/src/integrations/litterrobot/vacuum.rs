//! The litter box itself, modeled as a vacuum-style cleaner.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Map;
use serde_json::Value;
use tracing::info;

use super::entity::EntityType;
use super::entity::LitterRobotEntity;
use super::hub::Hub;
use crate::account::UnitStatus;
use crate::engine::CommandError;
use crate::engine::DeviceInfo;
use crate::engine::Entity;
use crate::engine::EntityCommand;
use crate::engine::EntityState;
use crate::engine::Platform;

/// Cleaner states as reported to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum CleanerState {
    Cleaning,
    Docked,
    Error,
}

/// Unit status to cleaner state; statuses missing here are errors.
const STATE_TABLE: &[(&str, CleanerState)] = &[
    ("CCP", CleanerState::Cleaning),
    ("EC", CleanerState::Cleaning),
    ("CCC", CleanerState::Docked),
    ("CST", CleanerState::Docked),
    ("DF1", CleanerState::Docked),
    ("DF2", CleanerState::Docked),
    ("RDY", CleanerState::Docked),
];

const SUPPORTED_FEATURES: &[&str] = &[
    "start",
    "state",
    "status",
    "turn_on",
    "turn_off",
    "send_command",
];

impl CleanerState {
    pub fn from_status(status: &UnitStatus) -> Self {
        STATE_TABLE
            .iter()
            .find(|(code, _)| *code == status.code())
            .map(|(_, state)| *state)
            .unwrap_or(CleanerState::Error)
    }
}

pub struct LitterRobotCleaner {
    base: LitterRobotEntity,
}

impl LitterRobotCleaner {
    pub fn new(base: LitterRobotEntity) -> Self {
        Self { base }
    }

    pub fn cleaner_state(&self) -> CleanerState {
        CleanerState::from_status(&self.base.data().unit_status)
    }

    /// Status label, marked when the robot is in its sleep window
    pub fn status(&self) -> String {
        let data = self.base.data();
        let label = data.unit_status.label();
        if data.is_sleeping {
            format!("{} (Sleeping)", label)
        } else {
            label.to_string()
        }
    }

    async fn send_command(
        &self,
        name: &str,
        params: &Map<String, Value>,
    ) -> Result<(), CommandError> {
        let robot = self.base.robot();
        match name {
            "reset_waste_drawer" => {
                // The API answers with fresh data, no need to wait and refresh
                robot.reset_waste_drawer().await?;
                self.base.hub().set_updated_data();
                Ok(())
            }
            "set_sleep_mode" => {
                let enabled = params
                    .get("enabled")
                    .and_then(Value::as_bool)
                    .ok_or_else(|| {
                        CommandError::InvalidParams("enabled must be a boolean".to_string())
                    })?;
                let sleep_time = match params.get("sleep_time") {
                    None | Some(Value::Null) => None,
                    Some(Value::String(s)) => self.base.parse_time_at_default_timezone(s),
                    Some(other) => {
                        return Err(CommandError::InvalidParams(format!(
                            "sleep_time must be a string, got {}",
                            other
                        )));
                    }
                };
                self.base
                    .perform_action_and_refresh(robot.set_sleep_mode(enabled, sleep_time))
                    .await?;
                Ok(())
            }
            other => Err(CommandError::NotImplemented(other.to_string())),
        }
    }
}

#[async_trait]
impl Entity for LitterRobotCleaner {
    fn unique_id(&self) -> String {
        self.base.unique_id()
    }

    fn name(&self) -> String {
        self.base.name()
    }

    fn platform(&self) -> Platform {
        Platform::Vacuum
    }

    fn available(&self) -> bool {
        self.base.available()
    }

    fn device_info(&self) -> DeviceInfo {
        self.base.device_info()
    }

    fn state(&self) -> EntityState {
        let data = self.base.data();
        self.base
            .render(self.cleaner_state().to_string())
            .with_icon("mdi:delete")
            .with_attribute("status", self.status())
            .with_attribute("error", data.unit_status.code())
            .with_attribute(
                "clean_cycle_wait_time_minutes",
                data.clean_cycle_wait_time_minutes,
            )
            .with_attribute("power_status", data.power_status.code())
            .with_attribute("supported_features", SUPPORTED_FEATURES.to_vec())
    }

    async fn handle_command(&self, command: EntityCommand) -> Result<(), CommandError> {
        info!("[{}] {} {}", self.base.hub().entry_id(), self.name(), command.name());
        let robot = self.base.robot();
        match command {
            EntityCommand::TurnOn { .. } => {
                self.base
                    .perform_action_and_refresh(robot.set_power_status(true))
                    .await?
            }
            EntityCommand::TurnOff => {
                self.base
                    .perform_action_and_refresh(robot.set_power_status(false))
                    .await?
            }
            EntityCommand::Start => {
                self.base
                    .perform_action_and_refresh(robot.start_cleaning())
                    .await?
            }
            EntityCommand::SendCommand { name, params } => {
                return self.send_command(&name, &params).await;
            }
        }
        Ok(())
    }
}

/// One cleaner per robot.
pub fn setup_entities(hub: &Arc<Hub>) -> Vec<Arc<dyn Entity>> {
    hub.robots()
        .into_iter()
        .map(|robot| {
            let base = LitterRobotEntity::new(robot, EntityType::LitterBox, hub.clone());
            Arc::new(LitterRobotCleaner::new(base)) as Arc<dyn Entity>
        })
        .collect()
}
