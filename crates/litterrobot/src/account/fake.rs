//! In-memory account and robots.
//!
//! Used by the test suites to drive the hub and entities without a network,
//! and to observe which actions the integration performed.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::RwLock;

use async_trait::async_trait;

use super::Account;
use super::AccountError;
use super::Robot;
use super::RobotData;
use super::UnitStatus;
use crate::time::ZonedTime;

/// An action a [`FakeRobot`] received.
#[derive(Debug, Clone, PartialEq)]
pub enum RobotCall {
    SetPowerStatus(bool),
    StartCleaning,
    SetNightLight(bool),
    SetPanelLockout(bool),
    SetSleepMode(bool, Option<ZonedTime>),
    ResetWasteDrawer,
}

/// Robot whose data lives in memory and which records every action.
#[derive(Debug, Default)]
pub struct FakeRobot {
    data: RwLock<RobotData>,
    calls: Mutex<Vec<RobotCall>>,
    fail_actions: AtomicBool,
}

impl FakeRobot {
    pub fn new(data: RobotData) -> Self {
        Self {
            data: RwLock::new(data),
            ..Default::default()
        }
    }

    /// A ready Litter-Robot 3 Connect with a half full drawer.
    pub fn with_serial(serial: &str, name: &str) -> Self {
        Self::new(RobotData {
            id: format!("id-{}", serial),
            serial: serial.to_string(),
            name: name.to_string(),
            unit_status: UnitStatus::Ready,
            waste_drawer_gauge: 50,
            cycle_count: 15,
            cycle_capacity: 30,
            clean_cycle_wait_time_minutes: 7,
            ..Default::default()
        })
    }

    /// Mutate the robot's data in place.
    pub fn update(&self, f: impl FnOnce(&mut RobotData)) {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut data);
    }

    /// All actions received so far, oldest first.
    pub fn calls(&self) -> Vec<RobotCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Make every subsequent action fail with an API error.
    pub fn set_fail_actions(&self, fail: bool) {
        self.fail_actions.store(fail, Ordering::SeqCst);
    }

    fn record(&self, call: RobotCall) -> Result<(), AccountError> {
        if self.fail_actions.load(Ordering::SeqCst) {
            return Err(AccountError::Api {
                status: 500,
                message: "simulated failure".to_string(),
            });
        }
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
        Ok(())
    }
}

#[async_trait]
impl Robot for FakeRobot {
    fn data(&self) -> RobotData {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn set_power_status(&self, on: bool) -> Result<(), AccountError> {
        self.record(RobotCall::SetPowerStatus(on))?;
        self.update(|d| {
            d.unit_status = if on {
                UnitStatus::Ready
            } else {
                UnitStatus::PowerOff
            }
        });
        Ok(())
    }

    async fn start_cleaning(&self) -> Result<(), AccountError> {
        self.record(RobotCall::StartCleaning)?;
        self.update(|d| d.unit_status = UnitStatus::CleanCycleInProgress);
        Ok(())
    }

    async fn set_night_light(&self, on: bool) -> Result<(), AccountError> {
        self.record(RobotCall::SetNightLight(on))?;
        self.update(|d| d.night_light_active = on);
        Ok(())
    }

    async fn set_panel_lockout(&self, on: bool) -> Result<(), AccountError> {
        self.record(RobotCall::SetPanelLockout(on))?;
        self.update(|d| d.panel_lock_active = on);
        Ok(())
    }

    async fn set_sleep_mode(
        &self,
        enabled: bool,
        sleep_time: Option<ZonedTime>,
    ) -> Result<(), AccountError> {
        self.record(RobotCall::SetSleepMode(enabled, sleep_time))?;
        self.update(|d| {
            d.sleep_mode_active = enabled;
            if let Some(start) = sleep_time.and_then(|t| t.on_date(chrono::Utc::now().date_naive()))
            {
                d.sleep_mode_start_time = Some(start);
            }
        });
        Ok(())
    }

    async fn reset_waste_drawer(&self) -> Result<(), AccountError> {
        self.record(RobotCall::ResetWasteDrawer)?;
        self.update(|d| {
            d.cycle_count = 0;
            d.cycles_after_drawer_full = 0;
            d.waste_drawer_gauge = 0;
        });
        Ok(())
    }
}

/// Account holding a fixed set of [`FakeRobot`]s.
#[derive(Debug, Default)]
pub struct FakeAccount {
    robots: Vec<Arc<FakeRobot>>,
    password: Option<String>,
    unreachable: AtomicBool,
    fail_refresh: AtomicBool,
    loaded: AtomicBool,
    connect_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
}

impl FakeAccount {
    pub fn new(robots: Vec<Arc<FakeRobot>>) -> Self {
        Self {
            robots,
            ..Default::default()
        }
    }

    /// Only accept `password` on connect; anything else is a login error.
    pub fn with_password(mut self, password: &str) -> Self {
        self.password = Some(password.to_string());
        self
    }

    /// Make connect and refresh fail as if the API could not be reached.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Make refresh fail with an API error.
    pub fn set_fail_refresh(&self, fail: bool) {
        self.fail_refresh.store(fail, Ordering::SeqCst);
    }

    pub fn connect_count(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_count(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    fn check_reachable(&self) -> Result<(), AccountError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(AccountError::Connection(
                "simulated network failure".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Account for FakeAccount {
    async fn connect(
        &self,
        _username: &str,
        password: &str,
        load_robots: bool,
    ) -> Result<(), AccountError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        self.check_reachable()?;

        if let Some(expected) = &self.password {
            if expected != password {
                return Err(AccountError::Login("wrong password".to_string()));
            }
        }

        if load_robots {
            self.loaded.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn refresh_robots(&self) -> Result<(), AccountError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        self.check_reachable()?;

        if self.fail_refresh.load(Ordering::SeqCst) {
            return Err(AccountError::Api {
                status: 503,
                message: "simulated refresh failure".to_string(),
            });
        }

        self.loaded.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn robots(&self) -> Vec<Arc<dyn Robot>> {
        if !self.loaded.load(Ordering::SeqCst) {
            return Vec::new();
        }
        self.robots
            .iter()
            .map(|r| r.clone() as Arc<dyn Robot>)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_robots_hidden_until_loaded() {
        let account = FakeAccount::new(vec![Arc::new(FakeRobot::with_serial("LR3C1", "Kitty"))]);

        account.connect("user", "pass", false).await.unwrap();
        assert!(account.robots().is_empty());

        account.refresh_robots().await.unwrap();
        assert_eq!(account.robots().len(), 1);
    }

    #[tokio::test]
    async fn test_wrong_password_is_login_error() {
        let account = FakeAccount::new(vec![]).with_password("secret");
        let err = account.connect("user", "nope", true).await.unwrap_err();
        assert!(err.is_login());
    }

    #[tokio::test]
    async fn test_actions_are_recorded() {
        let robot = FakeRobot::with_serial("LR3C1", "Kitty");
        robot.set_night_light(true).await.unwrap();
        robot.start_cleaning().await.unwrap();

        assert_eq!(
            robot.calls(),
            vec![RobotCall::SetNightLight(true), RobotCall::StartCleaning]
        );
        assert!(robot.data().night_light_active);
        assert_eq!(robot.data().unit_status, UnitStatus::CleanCycleInProgress);
    }
}
