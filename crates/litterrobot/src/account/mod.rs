//! Client seam for the Litter-Robot cloud account.
//!
//! The integration only talks to the vendor through the [`Account`] and
//! [`Robot`] traits. [`cloud::CloudAccount`] implements them over HTTPS,
//! `fake::FakeAccount` keeps everything in memory for tests.

#[cfg(feature = "cloud")]
pub mod cloud;
#[cfg(any(test, feature = "test-util"))]
pub mod fake;
mod status;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;

pub use status::PowerStatus;
pub use status::UnitStatus;

use crate::time::ZonedTime;

/// Errors reported by the vendor client.
#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    #[error("Invalid credentials: {0}")]
    Login(String),

    #[error("Unable to connect to Litter-Robot API: {0}")]
    Connection(String),

    #[error("Litter-Robot API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Failed to decode API response: {0}")]
    Decode(String),

    #[error("Not logged in to Litter-Robot API")]
    NotConnected,

    #[error("Litter-Robot session expired")]
    SessionExpired,
}

impl AccountError {
    /// Whether the error means the credentials were rejected.
    pub fn is_login(&self) -> bool {
        matches!(self, AccountError::Login(_))
    }
}

/// Snapshot of a robot's attributes as of the last refresh.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RobotData {
    pub id: String,
    pub serial: String,
    pub name: String,
    pub unit_status: UnitStatus,
    pub power_status: PowerStatus,

    /// Waste drawer fill level in percent (0-100)
    pub waste_drawer_gauge: u8,
    pub cycle_count: u32,
    pub cycle_capacity: u32,
    pub cycles_after_drawer_full: u32,

    pub night_light_active: bool,
    pub panel_lock_active: bool,

    pub sleep_mode_active: bool,
    pub sleep_mode_start_time: Option<DateTime<Utc>>,
    pub is_sleeping: bool,

    pub clean_cycle_wait_time_minutes: u32,
}

/// A single Litter-Robot unit.
///
/// Getters read the data cached by the last refresh; actions go to the API.
#[async_trait]
pub trait Robot: Send + Sync {
    /// Current attribute snapshot
    fn data(&self) -> RobotData;

    async fn set_power_status(&self, on: bool) -> Result<(), AccountError>;

    async fn start_cleaning(&self) -> Result<(), AccountError>;

    async fn set_night_light(&self, on: bool) -> Result<(), AccountError>;

    async fn set_panel_lockout(&self, on: bool) -> Result<(), AccountError>;

    /// Enable or disable sleep mode.
    ///
    /// When enabling without a `sleep_time`, the robot's current start time is
    /// kept, or the current time is used if the robot has none.
    async fn set_sleep_mode(
        &self,
        enabled: bool,
        sleep_time: Option<ZonedTime>,
    ) -> Result<(), AccountError>;

    /// Reset the drawer cycle counters.
    ///
    /// The API answers with the robot's refreshed data, which is applied
    /// before this returns.
    async fn reset_waste_drawer(&self) -> Result<(), AccountError>;
}

/// A logged-in vendor account and the robots it owns.
#[async_trait]
pub trait Account: Send + Sync {
    async fn connect(
        &self,
        username: &str,
        password: &str,
        load_robots: bool,
    ) -> Result<(), AccountError>;

    /// Re-fetch every robot's data.
    ///
    /// Robot handles returned by [`Account::robots`] stay valid and see the new data.
    async fn refresh_robots(&self) -> Result<(), AccountError>;

    fn robots(&self) -> Vec<Arc<dyn Robot>>;
}

/// Creates a fresh, not yet connected account client.
pub type AccountFactory = Arc<dyn Fn() -> Result<Arc<dyn Account>, AccountError> + Send + Sync>;
