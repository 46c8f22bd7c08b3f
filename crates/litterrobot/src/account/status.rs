use serde::Serialize;
use strum::AsRefStr;
use strum::EnumIter;
use strum::EnumString;

/// Unit status codes reported by a Litter-Robot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, AsRefStr, EnumString, EnumIter)]
pub enum UnitStatus {
    #[strum(serialize = "BR")]
    BonnetRemoved,
    #[strum(serialize = "CCC")]
    CleanCycleComplete,
    #[strum(serialize = "CCP")]
    CleanCycleInProgress,
    #[strum(serialize = "CSF")]
    CatSensorFault,
    #[strum(serialize = "CSI")]
    CatSensorInterrupted,
    #[strum(serialize = "CST")]
    CatSensorTiming,
    #[strum(serialize = "DF1")]
    DrawerAlmostFullTwoCycles,
    #[strum(serialize = "DF2")]
    DrawerAlmostFullOneCycle,
    #[strum(serialize = "DFS")]
    DrawerFull,
    #[strum(serialize = "EC")]
    EmptyCycle,
    #[strum(serialize = "OFF")]
    PowerOff,
    #[strum(serialize = "OFFLINE")]
    Offline,
    #[strum(serialize = "P")]
    Paused,
    #[strum(serialize = "RDY")]
    Ready,
    #[strum(serialize = "SDF")]
    DrawerFullAtStartup,
    /// A status code this client does not know about
    #[strum(disabled)]
    Unknown(String),
}

impl UnitStatus {
    /// Parse a status code, keeping unrecognised codes as `Unknown`.
    pub fn from_code(code: &str) -> Self {
        code.parse().unwrap_or_else(|_| Self::Unknown(code.to_string()))
    }

    /// The code as sent by the API (e.g. "RDY").
    pub fn code(&self) -> &str {
        match self {
            Self::Unknown(code) => code,
            other => other.as_ref(),
        }
    }

    /// Human readable description of the status.
    pub fn label(&self) -> &str {
        match self {
            Self::BonnetRemoved => "Bonnet Removed",
            Self::CleanCycleComplete => "Clean Cycle Complete",
            Self::CleanCycleInProgress => "Clean Cycle In Progress",
            Self::CatSensorFault => "Cat Sensor Fault",
            Self::CatSensorInterrupted => "Cat Sensor Interrupted",
            Self::CatSensorTiming => "Cat Sensor Timing",
            Self::DrawerAlmostFullTwoCycles => "Drawer Almost Full - 2 Cycles Left",
            Self::DrawerAlmostFullOneCycle => "Drawer Almost Full - 1 Cycle Left",
            Self::DrawerFull => "Drawer Full",
            Self::EmptyCycle => "Empty Cycle",
            Self::PowerOff => "Off",
            Self::Offline => "Offline",
            Self::Paused => "Clean Cycle Paused",
            Self::Ready => "Ready",
            Self::DrawerFullAtStartup => "Drawer Full At Startup",
            Self::Unknown(_) => "Unknown",
        }
    }
}

impl Default for UnitStatus {
    fn default() -> Self {
        Self::Unknown(String::new())
    }
}

/// Power source reported by a Litter-Robot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, AsRefStr, EnumString)]
pub enum PowerStatus {
    #[strum(serialize = "AC")]
    Ac,
    #[strum(serialize = "DC")]
    Dc,
    #[strum(serialize = "NC")]
    NotConnected,
    #[default]
    #[strum(disabled)]
    Unknown,
}

impl PowerStatus {
    pub fn from_code(code: &str) -> Self {
        code.parse().unwrap_or_default()
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Ac => "AC",
            Self::Dc => "DC",
            Self::NotConnected => "NC",
            Self::Unknown => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn test_known_codes_round_trip() {
        for status in UnitStatus::iter() {
            if let UnitStatus::Unknown(_) = status {
                continue;
            }
            assert_eq!(UnitStatus::from_code(status.code()), status);
        }
    }

    #[test]
    fn test_unknown_code_is_kept() {
        let status = UnitStatus::from_code("XYZ");
        assert_eq!(status, UnitStatus::Unknown("XYZ".to_string()));
        assert_eq!(status.code(), "XYZ");
        assert_eq!(status.label(), "Unknown");
    }

    #[test]
    fn test_power_status() {
        assert_eq!(PowerStatus::from_code("AC"), PowerStatus::Ac);
        assert_eq!(PowerStatus::from_code("DC"), PowerStatus::Dc);
        assert_eq!(PowerStatus::from_code("??"), PowerStatus::Unknown);
    }
}
