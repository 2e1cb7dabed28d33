use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Device identifier (the cloud "thing name")
pub type ThingName = String;

/// Room identifier inside a map
pub type RoomId = i64;

/// Robot working state as reported in `working_status`
///
/// Unknown firmware values are kept verbatim in `Other` so that status
/// comparison stays exact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum WorkingState {
    AutoClean,
    EdgeClean,
    EdgeDetect,
    SpotClean,
    RoomClean,
    SelectClean,
    MopClean,
    SmartClean,
    ZmodeClean,
    PlanningLocation,
    PlanningRect,
    Relocation,
    BackCharging,
    DirectionControl,
    LocationAlarm,
    Charging,
    PileCharging,
    DirCharging,
    ChargeDone,
    Hibernating,
    Idle,
    Standby,
    Malfunction,
    Other(String),
}

impl WorkingState {
    /// Wire name of the state
    pub fn as_str(&self) -> &str {
        match self {
            Self::AutoClean => "AutoClean",
            Self::EdgeClean => "EdgeClean",
            Self::EdgeDetect => "EdgeDetect",
            Self::SpotClean => "SpotClean",
            Self::RoomClean => "RoomClean",
            Self::SelectClean => "SelectClean",
            Self::MopClean => "MopClean",
            Self::SmartClean => "SmartClean",
            Self::ZmodeClean => "ZmodeClean",
            Self::PlanningLocation => "PlanningLocation",
            Self::PlanningRect => "PlanningRect",
            Self::Relocation => "Relocation",
            Self::BackCharging => "BackCharging",
            Self::DirectionControl => "DirectionControl",
            Self::LocationAlarm => "LocationAlarm",
            Self::Charging => "Charging",
            Self::PileCharging => "PileCharging",
            Self::DirCharging => "DirCharging",
            Self::ChargeDone => "ChargeDone",
            Self::Hibernating => "Hibernating",
            Self::Idle => "Idle",
            Self::Standby => "Standby",
            Self::Malfunction => "Malfunction",
            Self::Other(raw) => raw,
        }
    }

    /// Robot is out of the dock: cleaning, moving under user control or
    /// heading back to charge
    pub fn is_cleaning(&self) -> bool {
        matches!(
            self,
            Self::BackCharging
                | Self::DirectionControl
                | Self::PlanningRect
                | Self::Relocation
                | Self::ZmodeClean
                | Self::AutoClean
                | Self::EdgeClean
                | Self::EdgeDetect
                | Self::SpotClean
                | Self::RoomClean
                | Self::SelectClean
                | Self::MopClean
                | Self::SmartClean
        )
    }

    /// Robot is on a charger and still charging
    pub fn is_charging(&self) -> bool {
        matches!(self, Self::Charging | Self::PileCharging | Self::DirCharging)
    }

    /// Robot sits on its dock, charging or fully charged
    pub fn is_docked(&self) -> bool {
        self.is_charging() || matches!(self, Self::ChargeDone)
    }
}

impl From<String> for WorkingState {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "AutoClean" => Self::AutoClean,
            "EdgeClean" => Self::EdgeClean,
            "EdgeDetect" => Self::EdgeDetect,
            "SpotClean" => Self::SpotClean,
            "RoomClean" => Self::RoomClean,
            "SelectClean" => Self::SelectClean,
            "MopClean" => Self::MopClean,
            "SmartClean" => Self::SmartClean,
            "ZmodeClean" => Self::ZmodeClean,
            "PlanningLocation" => Self::PlanningLocation,
            "PlanningRect" => Self::PlanningRect,
            "Relocation" => Self::Relocation,
            "BackCharging" => Self::BackCharging,
            "DirectionControl" => Self::DirectionControl,
            "LocationAlarm" => Self::LocationAlarm,
            "Charging" => Self::Charging,
            "PileCharging" => Self::PileCharging,
            "DirCharging" => Self::DirCharging,
            "ChargeDone" => Self::ChargeDone,
            "Hibernating" => Self::Hibernating,
            "Idle" => Self::Idle,
            "Standby" => Self::Standby,
            "Malfunction" => Self::Malfunction,
            _ => Self::Other(raw),
        }
    }
}

impl From<WorkingState> for String {
    fn from(state: WorkingState) -> Self {
        match state {
            WorkingState::Other(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for WorkingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Suction power levels accepted by the robot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanSpeed {
    Quiet,
    Normal,
    Strong,
}

impl FanSpeed {
    pub const ALL: [FanSpeed; 3] = [FanSpeed::Quiet, FanSpeed::Normal, FanSpeed::Strong];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Quiet => "Quiet",
            Self::Normal => "Normal",
            Self::Strong => "Strong",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|speed| speed.as_str() == value)
    }
}

/// Mop water levels accepted by the robot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MopLevel {
    Low,
    Default,
    High,
}

impl MopLevel {
    pub const ALL: [MopLevel; 3] = [MopLevel::Low, MopLevel::Default, MopLevel::High];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Default => "Default",
            Self::High => "High",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|level| level.as_str() == value)
    }
}

/// On/off switch values used by voice and do-not-disturb settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Switch {
    On,
    Off,
}

impl Switch {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::On => "on",
            Self::Off => "off",
        }
    }
}

impl From<bool> for Switch {
    fn from(on: bool) -> Self {
        if on {
            Self::On
        } else {
            Self::Off
        }
    }
}

/// Which cleaning tool the robot is using
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleaningMode {
    /// Fan and water level are not reported
    Unknown,
    Vacuum,
    Mop,
}

/// Value the robot reports for a disabled fan or mop
const DISABLED: &str = "None";

/// Last known robot status, as pushed in `thing_status`
///
/// The set of fields varies with firmware and sub type, so every field is
/// optional and anything unrecognized is kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RobotStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_status: Option<WorkingState>,

    #[serde(default, deserialize_with = "lenient_number", skip_serializing_if = "Option::is_none")]
    pub battery_level: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fan_status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub water_level: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_info: Option<String>,

    /// Cloud connectivity, sent as `"true"`/`"false"` or as a boolean
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connected: Option<Value>,

    /// Cumulative clean time in seconds
    #[serde(default, deserialize_with = "lenient_number", skip_serializing_if = "Option::is_none")]
    pub clean_time: Option<f64>,

    /// Cumulative clean area in square meters
    #[serde(default, deserialize_with = "lenient_number", skip_serializing_if = "Option::is_none")]
    pub clean_area: Option<f64>,

    #[serde(default, deserialize_with = "lenient_number", skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_switch: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub undisturb_mode: Option<String>,

    /// Id of the map currently used by the robot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hismap_id: Option<Value>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl RobotStatus {
    pub fn working_state(&self) -> Option<&WorkingState> {
        self.working_status.as_ref()
    }

    pub fn is_cleaning(&self) -> bool {
        self.working_state().is_some_and(WorkingState::is_cleaning)
    }

    pub fn is_charging(&self) -> bool {
        self.working_state().is_some_and(WorkingState::is_charging)
    }

    pub fn is_docked(&self) -> bool {
        self.working_state().is_some_and(WorkingState::is_docked)
    }

    /// Battery level in percent
    pub fn battery_level(&self) -> Option<u8> {
        self.battery_level.map(|level| level.clamp(0.0, 100.0).round() as u8)
    }

    pub fn is_connected(&self) -> bool {
        match &self.connected {
            Some(Value::Bool(connected)) => *connected,
            Some(Value::String(connected)) => connected == "true",
            _ => false,
        }
    }

    /// Reported error, `None` when the robot says `NoError`
    pub fn error(&self) -> Option<&str> {
        self.error_info
            .as_deref()
            .filter(|error| !error.is_empty() && *error != "NoError")
    }

    pub fn cleaning_mode(&self) -> CleaningMode {
        match (self.fan_status.as_deref(), self.water_level.as_deref()) {
            (Some(DISABLED), Some(water)) if water != DISABLED => CleaningMode::Mop,
            (Some(_), Some(_)) => CleaningMode::Vacuum,
            _ => CleaningMode::Unknown,
        }
    }

    /// Active map id as a string, whether it was sent as a number or a string
    pub fn active_map_id(&self) -> Option<String> {
        match &self.hismap_id {
            Some(Value::Number(id)) => Some(id.to_string()),
            Some(Value::String(id)) if !id.is_empty() => Some(id.clone()),
            _ => None,
        }
    }
}

/// Accept numbers that arrive either as JSON numbers or numeric strings
fn lenient_number<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }))
}

/// A robot registered on the account, from `user_thing_list_get`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub thing_name: ThingName,

    #[serde(default)]
    pub thing_nickname: String,

    pub sub_type: String,

    /// Status snapshot at listing time
    #[serde(default)]
    pub thing_status: RobotStatus,
}

/// WebSocket link state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Faulted,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Faulted => "faulted",
        };
        f.write_str(name)
    }
}
