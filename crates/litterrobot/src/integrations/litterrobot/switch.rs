//! Switches: night light, panel lockout and sleep mode.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveTime;
use serde_json::Map;
use serde_json::Value;
use tracing::info;

use super::entity::EntityType;
use super::entity::LitterRobotEntity;
use super::hub::Hub;
use crate::engine::CommandError;
use crate::engine::DeviceInfo;
use crate::engine::Entity;
use crate::engine::EntityCommand;
use crate::engine::EntityState;
use crate::engine::Platform;
use crate::time::ZonedTime;

/// Sleep mode start time used when turning sleep mode on without one
const DEFAULT_SLEEP_START: (u32, u32) = (22, 0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchKind {
    NightLight,
    PanelLockout,
    SleepMode,
}

impl SwitchKind {
    pub const ALL: [SwitchKind; 3] = [
        SwitchKind::NightLight,
        SwitchKind::PanelLockout,
        SwitchKind::SleepMode,
    ];

    pub fn entity_type(self) -> EntityType {
        match self {
            SwitchKind::NightLight => EntityType::NightLight,
            SwitchKind::PanelLockout => EntityType::PanelLockout,
            SwitchKind::SleepMode => EntityType::SleepMode,
        }
    }

    /// Icon when on, icon when off
    fn icons(self) -> (&'static str, &'static str) {
        match self {
            SwitchKind::NightLight => ("mdi:lightbulb-on", "mdi:lightbulb-off"),
            SwitchKind::PanelLockout => ("mdi:lock", "mdi:lock-open"),
            SwitchKind::SleepMode => ("mdi:sleep", "mdi:sleep-off"),
        }
    }
}

pub struct LitterRobotSwitch {
    base: LitterRobotEntity,
    kind: SwitchKind,
}

impl LitterRobotSwitch {
    pub fn new(base: LitterRobotEntity, kind: SwitchKind) -> Self {
        Self { base, kind }
    }

    pub fn is_on(&self) -> bool {
        let data = self.base.data();
        match self.kind {
            SwitchKind::NightLight => data.night_light_active,
            SwitchKind::PanelLockout => data.panel_lock_active,
            SwitchKind::SleepMode => data.sleep_mode_active,
        }
    }

    pub fn icon(&self) -> &'static str {
        let (on, off) = self.kind.icons();
        if self.is_on() { on } else { off }
    }

    /// Start time for turning sleep mode on.
    ///
    /// Without a `start_time` parameter sleep starts at 22:00. A string that is
    /// not a time of day yields `None`, keeping the robot's current start time.
    fn sleep_start_time(
        &self,
        params: &Map<String, Value>,
    ) -> Result<Option<ZonedTime>, CommandError> {
        match params.get("start_time") {
            None | Some(Value::Null) => {
                let (hour, minute) = DEFAULT_SLEEP_START;
                Ok(NaiveTime::from_hms_opt(hour, minute, 0)
                    .map(|time| ZonedTime::new(time, self.base.hub().timezone())))
            }
            Some(Value::String(s)) => Ok(self.base.parse_time_at_default_timezone(s)),
            Some(other) => Err(CommandError::InvalidParams(format!(
                "start_time must be a string, got {}",
                other
            ))),
        }
    }

    async fn turn_on(&self, params: &Map<String, Value>) -> Result<(), CommandError> {
        let robot = self.base.robot();
        match self.kind {
            SwitchKind::NightLight => {
                self.base
                    .perform_action_and_refresh(robot.set_night_light(true))
                    .await?
            }
            SwitchKind::PanelLockout => {
                self.base
                    .perform_action_and_refresh(robot.set_panel_lockout(true))
                    .await?
            }
            SwitchKind::SleepMode => {
                let start = self.sleep_start_time(params)?;
                self.base
                    .perform_action_and_refresh(robot.set_sleep_mode(true, start))
                    .await?
            }
        }
        Ok(())
    }

    async fn turn_off(&self) -> Result<(), CommandError> {
        let robot = self.base.robot();
        match self.kind {
            SwitchKind::NightLight => {
                self.base
                    .perform_action_and_refresh(robot.set_night_light(false))
                    .await?
            }
            SwitchKind::PanelLockout => {
                self.base
                    .perform_action_and_refresh(robot.set_panel_lockout(false))
                    .await?
            }
            SwitchKind::SleepMode => {
                self.base
                    .perform_action_and_refresh(robot.set_sleep_mode(false, None))
                    .await?
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Entity for LitterRobotSwitch {
    fn unique_id(&self) -> String {
        self.base.unique_id()
    }

    fn name(&self) -> String {
        self.base.name()
    }

    fn platform(&self) -> Platform {
        Platform::Switch
    }

    fn available(&self) -> bool {
        self.base.available()
    }

    fn device_info(&self) -> DeviceInfo {
        self.base.device_info()
    }

    fn state(&self) -> EntityState {
        let state = if self.is_on() { "on" } else { "off" };
        self.base.render(state).with_icon(self.icon())
    }

    async fn handle_command(&self, command: EntityCommand) -> Result<(), CommandError> {
        info!("[{}] {} {}", self.base.hub().entry_id(), self.name(), command.name());
        match command {
            EntityCommand::TurnOn { params } => self.turn_on(&params).await,
            EntityCommand::TurnOff => self.turn_off().await,
            other => Err(CommandError::NotSupported {
                platform: Platform::Switch,
                command: other.name(),
            }),
        }
    }
}

/// One switch per robot per [`SwitchKind`].
pub fn setup_entities(hub: &Arc<Hub>) -> Vec<Arc<dyn Entity>> {
    let mut entities: Vec<Arc<dyn Entity>> = Vec::new();
    for robot in hub.robots() {
        for kind in SwitchKind::ALL {
            let base = LitterRobotEntity::new(robot.clone(), kind.entity_type(), hub.clone());
            entities.push(Arc::new(LitterRobotSwitch::new(base, kind)));
        }
    }
    entities
}
