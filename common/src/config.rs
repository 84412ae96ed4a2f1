use std::{collections::HashMap, time::Duration};

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{error::ResolveError, types::GrowthPhase};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub poll_interval_ms: u64,
    pub sensor_stale_timeout_ms: u64,
    pub reaction_window_ms: u64,
    pub pump_volume_ml: f64,
    pub pump_flow_ml_per_s: f64,
    pub photoperiod_start_minutes: u16,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 30_000,
            sensor_stale_timeout_ms: 120_000,
            reaction_window_ms: 120_000,
            pump_volume_ml: 100.0,
            pump_flow_ml_per_s: 1.31,
            photoperiod_start_minutes: 6 * 60,
        }
    }
}

impl ControllerConfig {
    pub fn sanitize(&mut self) {
        self.poll_interval_ms = self.poll_interval_ms.clamp(1_000, 3_600_000);
        self.sensor_stale_timeout_ms = self.sensor_stale_timeout_ms.clamp(5_000, 3_600_000);
        self.reaction_window_ms = self.reaction_window_ms.min(86_400_000);

        let defaults = Self::default();
        if !self.pump_volume_ml.is_finite() || self.pump_volume_ml <= 0.0 {
            self.pump_volume_ml = defaults.pump_volume_ml;
        }
        if !self.pump_flow_ml_per_s.is_finite() || self.pump_flow_ml_per_s <= 0.0 {
            self.pump_flow_ml_per_s = defaults.pump_flow_ml_per_s;
        }
        if self.photoperiod_start_minutes >= 24 * 60 {
            self.photoperiod_start_minutes = defaults.photoperiod_start_minutes;
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn photoperiod_start(&self) -> NaiveTime {
        let hour = u32::from(self.photoperiod_start_minutes / 60);
        let minute = u32::from(self.photoperiod_start_minutes % 60);
        NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or_default()
    }

    pub fn pump_calibration(&self) -> PumpCalibration {
        PumpCalibration {
            volume_ml: self.pump_volume_ml,
            flow_ml_per_s: self.pump_flow_ml_per_s,
            reaction_window: Duration::from_millis(self.reaction_window_ms),
        }
    }
}

/// Fixed pump constants: how much water one pulse delivers and how long the
/// soil needs before another pulse may be considered.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PumpCalibration {
    pub volume_ml: f64,
    pub flow_ml_per_s: f64,
    pub reaction_window: Duration,
}

impl PumpCalibration {
    pub fn irrigation_duration(&self) -> Duration {
        Duration::from_secs_f64(self.volume_ml / self.flow_ml_per_s)
    }
}

impl Default for PumpCalibration {
    fn default() -> Self {
        ControllerConfig::default().pump_calibration()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
    pub http_port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            mqtt_host: "127.0.0.1".to_string(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
            http_port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub greenhouse_id: String,
    pub timezone: String,
    pub controller: ControllerConfig,
    pub network: NetworkConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            greenhouse_id: "EG001".to_string(),
            timezone: "America/Sao_Paulo".to_string(),
            controller: ControllerConfig::default(),
            network: NetworkConfig::default(),
        }
    }
}

/// Directly desired values. When present they replace the min/max band
/// logic for that variable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Setpoints {
    pub temperature: Option<f32>,
    pub soil_temperature: Option<f32>,
    pub humidity: Option<f32>,
    pub soil_moisture: Option<f32>,
    pub light: Option<f32>,
}

/// Per (plant, phase) thresholds from the preset book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseProfile {
    pub temperature_min: f32,
    pub temperature_max: f32,
    pub soil_moisture_min: f32,
    pub soil_moisture_max: f32,
    pub humidity_max: f32,
    pub photoperiod_hours: Option<f32>,
    pub required_days: Option<f64>,
    pub desired: Setpoints,
}

impl Default for PhaseProfile {
    fn default() -> Self {
        Self {
            temperature_min: 0.0,
            temperature_max: 999.0,
            soil_moisture_min: 30.0,
            soil_moisture_max: 80.0,
            humidity_max: 999.0,
            photoperiod_hours: None,
            required_days: None,
            desired: Setpoints::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PresetBook {
    plants: HashMap<String, HashMap<GrowthPhase, PhaseProfile>>,
}

impl PresetBook {
    pub fn get_profile(&self, plant: &str, phase: GrowthPhase) -> Option<&PhaseProfile> {
        self.plants.get(plant)?.get(&phase)
    }

    pub fn insert(&mut self, plant: impl Into<String>, phase: GrowthPhase, profile: PhaseProfile) {
        self.plants
            .entry(plant.into())
            .or_default()
            .insert(phase, profile);
    }

    pub fn plants(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.plants.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideVariable {
    Temperature,
    SoilTemperature,
    Humidity,
    SoilMoisture,
    Light,
}

impl std::str::FromStr for OverrideVariable {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "temperature" => Ok(Self::Temperature),
            "soil_temperature" => Ok(Self::SoilTemperature),
            "humidity" => Ok(Self::Humidity),
            "soil_moisture" => Ok(Self::SoilMoisture),
            "light" => Ok(Self::Light),
            other => Err(format!("unknown override variable '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverrideSetting {
    pub enabled: bool,
    pub desired: Option<f32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Overrides {
    pub temperature: OverrideSetting,
    pub soil_temperature: OverrideSetting,
    pub humidity: OverrideSetting,
    pub soil_moisture: OverrideSetting,
    pub light: OverrideSetting,
}

impl Overrides {
    pub fn get(&self, variable: OverrideVariable) -> &OverrideSetting {
        match variable {
            OverrideVariable::Temperature => &self.temperature,
            OverrideVariable::SoilTemperature => &self.soil_temperature,
            OverrideVariable::Humidity => &self.humidity,
            OverrideVariable::SoilMoisture => &self.soil_moisture,
            OverrideVariable::Light => &self.light,
        }
    }

    pub fn get_mut(&mut self, variable: OverrideVariable) -> &mut OverrideSetting {
        match variable {
            OverrideVariable::Temperature => &mut self.temperature,
            OverrideVariable::SoilTemperature => &mut self.soil_temperature,
            OverrideVariable::Humidity => &mut self.humidity,
            OverrideVariable::SoilMoisture => &mut self.soil_moisture,
            OverrideVariable::Light => &mut self.light,
        }
    }

    fn flags(&self) -> OverrideFlags {
        OverrideFlags {
            temperature: self.temperature.enabled,
            soil_temperature: self.soil_temperature.enabled,
            humidity: self.humidity.enabled,
            soil_moisture: self.soil_moisture.enabled,
            light: self.light.enabled,
        }
    }
}

/// Persisted greenhouse state, written by phase transitions and external
/// requests and read back by the resolver every tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GreenhouseDocument {
    pub plant: Option<String>,
    pub phase: GrowthPhase,
    pub phase_start: Option<DateTime<Utc>>,
    pub system_enabled: bool,
    pub force_advance: bool,
    pub overrides: Overrides,
}

impl Default for GreenhouseDocument {
    fn default() -> Self {
        Self {
            plant: None,
            phase: GrowthPhase::Standby,
            phase_start: None,
            system_enabled: false,
            force_advance: false,
            overrides: Overrides::default(),
        }
    }
}

impl GreenhouseDocument {
    /// Transition write shared by polled, scheduled and forced advancement.
    pub fn enter_phase(&mut self, phase: GrowthPhase, now: DateTime<Utc>) {
        self.phase = phase;
        self.phase_start = Some(now);
        self.system_enabled = phase != GrowthPhase::Harvest;
        self.force_advance = false;
    }

    pub fn start(&mut self, plant: impl Into<String>, phase: GrowthPhase, now: DateTime<Utc>) {
        self.plant = Some(plant.into());
        self.enter_phase(phase, now);
    }

    pub fn reset_to_standby(&mut self) {
        self.plant = None;
        self.phase = GrowthPhase::Standby;
        self.phase_start = None;
        self.system_enabled = false;
        self.force_advance = false;
    }

    /// Whether a configuration change should wake the control loop.
    pub fn is_running(&self) -> bool {
        self.system_enabled && !self.phase.is_paused()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OverrideFlags {
    pub temperature: bool,
    pub soil_temperature: bool,
    pub humidity: bool,
    pub soil_moisture: bool,
    pub light: bool,
}

/// Resolved, read-only snapshot for one tick: preset merged with overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveConfiguration {
    pub system_enabled: bool,
    pub plant: Option<String>,
    pub phase: GrowthPhase,
    pub phase_start: Option<DateTime<Utc>>,
    pub force_advance: bool,
    pub overrides: OverrideFlags,
    pub profile: PhaseProfile,
    pub desired: Setpoints,
}

impl ActiveConfiguration {
    fn paused(doc: &GreenhouseDocument, phase: GrowthPhase) -> Self {
        Self {
            system_enabled: false,
            plant: doc.plant.clone(),
            phase,
            phase_start: doc.phase_start,
            force_advance: false,
            overrides: OverrideFlags::default(),
            profile: PhaseProfile::default(),
            desired: Setpoints::default(),
        }
    }
}

pub fn resolve(
    doc: &GreenhouseDocument,
    presets: &PresetBook,
) -> Result<ActiveConfiguration, ResolveError> {
    if doc.phase == GrowthPhase::Standby {
        return Ok(ActiveConfiguration::paused(doc, GrowthPhase::Standby));
    }

    let Some(plant) = doc.plant.as_deref().filter(|plant| !plant.trim().is_empty()) else {
        return Err(ResolveError::Invalid(format!(
            "phase {} has no plant assigned",
            doc.phase
        )));
    };

    if doc.phase == GrowthPhase::Harvest {
        return Ok(ActiveConfiguration::paused(doc, GrowthPhase::Harvest));
    }

    let profile = presets
        .get_profile(plant, doc.phase)
        .cloned()
        .ok_or_else(|| ResolveError::PresetNotFound {
            plant: plant.to_string(),
            phase: doc.phase,
        })?;

    let mut desired = profile.desired;
    merge_override(&mut desired.temperature, &doc.overrides.temperature);
    merge_override(&mut desired.soil_temperature, &doc.overrides.soil_temperature);
    merge_override(&mut desired.humidity, &doc.overrides.humidity);
    merge_override(&mut desired.soil_moisture, &doc.overrides.soil_moisture);
    merge_override(&mut desired.light, &doc.overrides.light);

    Ok(ActiveConfiguration {
        system_enabled: doc.system_enabled,
        plant: Some(plant.to_string()),
        phase: doc.phase,
        phase_start: doc.phase_start,
        force_advance: doc.force_advance,
        overrides: doc.overrides.flags(),
        profile,
        desired,
    })
}

fn merge_override(target: &mut Option<f32>, setting: &OverrideSetting) {
    if setting.enabled {
        if let Some(value) = setting.desired {
            *target = Some(value);
        }
    }
}
