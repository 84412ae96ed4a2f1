use std::{cmp::Ordering, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::ControlError;

/// Cultivation stage. The cycle phases are totally ordered
/// `Germination < Growth < Flowering < Harvest`; `Standby` sits outside the
/// cycle and compares with nothing but itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GrowthPhase {
    Standby,
    Germination,
    Growth,
    Flowering,
    Harvest,
}

impl GrowthPhase {
    pub const CYCLE: [GrowthPhase; 4] = [
        Self::Germination,
        Self::Growth,
        Self::Flowering,
        Self::Harvest,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Standby => "Standby",
            Self::Germination => "Germination",
            Self::Growth => "Growth",
            Self::Flowering => "Flowering",
            Self::Harvest => "Harvest",
        }
    }

    pub fn cycle_index(self) -> Option<usize> {
        Self::CYCLE.iter().position(|phase| *phase == self)
    }

    /// Successor in the cycle; `None` from `Harvest` and from `Standby`.
    pub fn next(self) -> Option<Self> {
        let index = self.cycle_index()?;
        Self::CYCLE.get(index + 1).copied()
    }

    /// Phases with no automatic advancement out of them.
    pub fn is_paused(self) -> bool {
        matches!(self, Self::Standby | Self::Harvest)
    }
}

impl PartialOrd for GrowthPhase {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self.cycle_index(), other.cycle_index()) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            _ if self == other => Some(Ordering::Equal),
            _ => None,
        }
    }
}

impl fmt::Display for GrowthPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GrowthPhase {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "standby" => Ok(Self::Standby),
            "germination" => Ok(Self::Germination),
            "growth" => Ok(Self::Growth),
            "flowering" => Ok(Self::Flowering),
            "harvest" => Ok(Self::Harvest),
            other => Err(format!("unknown growth phase '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActuatorId {
    Heater,
    Fan,
    Lamp,
    Pump,
}

impl ActuatorId {
    pub const ALL: [ActuatorId; 4] = [Self::Heater, Self::Fan, Self::Lamp, Self::Pump];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Heater => "heater",
            Self::Fan => "fan",
            Self::Lamp => "lamp",
            Self::Pump => "pump",
        }
    }
}

impl fmt::Display for ActuatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActuatorDecision {
    pub active: bool,
    pub reason: String,
}

impl ActuatorDecision {
    pub fn on(reason: impl Into<String>) -> Self {
        Self {
            active: true,
            reason: reason.into(),
        }
    }

    pub fn off(reason: impl Into<String>) -> Self {
        Self {
            active: false,
            reason: reason.into(),
        }
    }

    /// Every fault fails safe to off.
    pub fn fault(error: ControlError) -> Self {
        Self::off(error.to_string())
    }
}

/// One tick's readings. Each value is independently absent when the sensor
/// did not deliver (or delivered too long ago).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SensorSnapshot {
    #[serde(rename = "airTemperature")]
    pub air_temperature: Option<f32>,
    #[serde(rename = "airHumidity")]
    pub air_humidity: Option<f32>,
    #[serde(rename = "soilTemperature")]
    pub soil_temperature: Option<f32>,
    #[serde(rename = "soilMoisture")]
    pub soil_moisture: Option<f32>,
    pub light: Option<f32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActuatorStatePayload {
    pub greenhouse: String,
    pub actuator: &'static str,
    pub active: bool,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PhaseStatePayload {
    pub greenhouse: String,
    pub phase: &'static str,
    #[serde(rename = "phaseStartEpoch")]
    pub phase_start_epoch: Option<i64>,
}

/// Averages of the readings buffered since the previous report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorAveragesPayload {
    pub greenhouse: String,
    #[serde(flatten)]
    pub averages: SensorSnapshot,
    #[serde(rename = "timestampEpoch")]
    pub timestamp_epoch: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Confirmed,
    Error,
}

/// Outcome of one external request, echoed back to the requester.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestResultPayload {
    pub greenhouse: String,
    pub request: &'static str,
    pub status: RequestStatus,
    pub error: Option<String>,
}
