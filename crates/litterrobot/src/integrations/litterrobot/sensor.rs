//! Sensors: waste drawer level and sleep mode start time.

use std::sync::Arc;

use async_trait::async_trait;

use super::entity::EntityType;
use super::entity::LitterRobotEntity;
use super::hub::Hub;
use crate::engine::DeviceInfo;
use crate::engine::Entity;
use crate::engine::EntityState;
use crate::engine::Platform;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:00Z";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorKind {
    WasteDrawer,
    SleepModeStartTime,
}

impl SensorKind {
    pub const ALL: [SensorKind; 2] = [SensorKind::WasteDrawer, SensorKind::SleepModeStartTime];

    pub fn entity_type(self) -> EntityType {
        match self {
            SensorKind::WasteDrawer => EntityType::WasteDrawer,
            SensorKind::SleepModeStartTime => EntityType::SleepModeStartTime,
        }
    }
}

/// Icon for a waste drawer fill level.
pub fn waste_drawer_icon(gauge: u8) -> &'static str {
    match gauge {
        0..=10 => "mdi:gauge-empty",
        11..=49 => "mdi:gauge-low",
        50..=90 => "mdi:gauge",
        _ => "mdi:gauge-full",
    }
}

pub struct LitterRobotSensor {
    base: LitterRobotEntity,
    kind: SensorKind,
}

impl LitterRobotSensor {
    pub fn new(base: LitterRobotEntity, kind: SensorKind) -> Self {
        Self { base, kind }
    }

    fn waste_drawer_state(&self) -> EntityState {
        let data = self.base.data();
        self.base
            .render(data.waste_drawer_gauge.to_string())
            .with_unit("%")
            .with_icon(waste_drawer_icon(data.waste_drawer_gauge))
            .with_attribute("cycle_count", data.cycle_count)
            .with_attribute("cycle_capacity", data.cycle_capacity)
            .with_attribute("cycles_after_drawer_full", data.cycles_after_drawer_full)
    }

    fn sleep_mode_start_time_state(&self) -> EntityState {
        let data = self.base.data();
        let start = data
            .sleep_mode_start_time
            .filter(|_| data.sleep_mode_active);

        match start {
            Some(start) => self
                .base
                .render(start.format(TIMESTAMP_FORMAT).to_string())
                .with_device_class(Some("timestamp")),
            None => self.base.render("Disabled"),
        }
        .with_icon("mdi:clock")
    }
}

#[async_trait]
impl Entity for LitterRobotSensor {
    fn unique_id(&self) -> String {
        self.base.unique_id()
    }

    fn name(&self) -> String {
        self.base.name()
    }

    fn platform(&self) -> Platform {
        Platform::Sensor
    }

    fn available(&self) -> bool {
        self.base.available()
    }

    fn device_info(&self) -> DeviceInfo {
        self.base.device_info()
    }

    fn state(&self) -> EntityState {
        match self.kind {
            SensorKind::WasteDrawer => self.waste_drawer_state(),
            SensorKind::SleepModeStartTime => self.sleep_mode_start_time_state(),
        }
    }
}

/// One sensor per robot per [`SensorKind`].
pub fn setup_entities(hub: &Arc<Hub>) -> Vec<Arc<dyn Entity>> {
    let mut entities: Vec<Arc<dyn Entity>> = Vec::new();
    for robot in hub.robots() {
        for kind in SensorKind::ALL {
            let base = LitterRobotEntity::new(robot.clone(), kind.entity_type(), hub.clone());
            entities.push(Arc::new(LitterRobotSensor::new(base, kind)));
        }
    }
    entities
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use chrono::Utc;

    use super::*;
    use crate::account::fake::FakeRobot;
    use crate::integrations::litterrobot::entity::test_support::logged_in_hub;

    async fn sensor(robot: Arc<FakeRobot>, kind: SensorKind) -> LitterRobotSensor {
        let (hub, _) = logged_in_hub(robot.clone()).await;
        LitterRobotSensor::new(
            LitterRobotEntity::new(robot, kind.entity_type(), hub),
            kind,
        )
    }

    #[test]
    fn test_waste_drawer_icon_bands() {
        assert_eq!(waste_drawer_icon(0), "mdi:gauge-empty");
        assert_eq!(waste_drawer_icon(10), "mdi:gauge-empty");
        assert_eq!(waste_drawer_icon(11), "mdi:gauge-low");
        assert_eq!(waste_drawer_icon(49), "mdi:gauge-low");
        assert_eq!(waste_drawer_icon(50), "mdi:gauge");
        assert_eq!(waste_drawer_icon(90), "mdi:gauge");
        assert_eq!(waste_drawer_icon(91), "mdi:gauge-full");
        assert_eq!(waste_drawer_icon(100), "mdi:gauge-full");
    }

    #[tokio::test]
    async fn test_waste_drawer_state() {
        let robot = Arc::new(FakeRobot::with_serial("LR3C1", "Kitty"));
        let sensor = sensor(robot.clone(), SensorKind::WasteDrawer).await;

        assert_eq!(sensor.name(), "Kitty Waste Drawer");
        let json = serde_json::to_string_pretty(&sensor.state()).unwrap();
        insta::assert_snapshot!(json, @r#"
        {
          "state": "50",
          "available": true,
          "icon": "mdi:gauge",
          "unit_of_measurement": "%",
          "attributes": {
            "cycle_capacity": 30,
            "cycle_count": 15,
            "cycles_after_drawer_full": 0
          }
        }
        "#);

        robot.update(|d| d.waste_drawer_gauge = 95);
        let state = sensor.state();
        assert_eq!(state.state, "95");
        assert_eq!(state.icon.as_deref(), Some("mdi:gauge-full"));
    }

    #[tokio::test]
    async fn test_sleep_mode_start_time() {
        let robot = Arc::new(FakeRobot::with_serial("LR3C1", "Kitty"));
        robot.update(|d| {
            d.sleep_mode_active = true;
            d.sleep_mode_start_time = Utc.with_ymd_and_hms(2024, 3, 1, 22, 30, 45).single();
        });
        let sensor = sensor(robot.clone(), SensorKind::SleepModeStartTime).await;

        let state = sensor.state();
        assert_eq!(state.state, "2024-03-01T22:30:00Z");
        assert_eq!(state.device_class.as_deref(), Some("timestamp"));
        assert_eq!(state.icon.as_deref(), Some("mdi:clock"));

        robot.update(|d| d.sleep_mode_active = false);
        let state = sensor.state();
        assert_eq!(state.state, "Disabled");
        assert_eq!(state.device_class, None);
    }

    #[tokio::test]
    async fn test_setup_entities_per_robot() {
        let robot = Arc::new(FakeRobot::with_serial("LR3C1", "Kitty"));
        let (hub, _) = logged_in_hub(robot).await;

        let ids: Vec<String> = setup_entities(&hub).iter().map(|e| e.unique_id()).collect();
        assert_eq!(
            ids,
            vec!["LR3C1-Waste Drawer", "LR3C1-Sleep Mode Start Time"]
        );
    }
}
