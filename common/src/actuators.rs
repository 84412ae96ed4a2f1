//! Decision rules for the four actuators. Pure functions of readings,
//! resolved configuration and (for the pump) time since the last pulse; the
//! controller binary owns the relays and timers.

use std::time::Duration;

use chrono::NaiveTime;

use crate::{
    config::{ActiveConfiguration, PumpCalibration},
    error::ControlError,
    types::ActuatorDecision,
};

pub const DEFAULT_PHOTOPERIOD_HOURS: f32 = 12.0;

pub fn heater_decision(
    air_temperature: Option<f32>,
    config: &ActiveConfiguration,
) -> ActuatorDecision {
    let Some(reading) = air_temperature else {
        return ActuatorDecision::fault(ControlError::InvalidReading);
    };

    let min = config.profile.temperature_min;
    let max = config.profile.temperature_max;
    if min > max {
        return ActuatorDecision::fault(ControlError::InconsistentConfiguration);
    }

    if let Some(desired) = config.desired.temperature {
        return if reading < desired {
            ActuatorDecision::on(format!("{reading:.1}°C < desired {desired:.1}°C"))
        } else {
            ActuatorDecision::off(format!("{reading:.1}°C >= desired {desired:.1}°C"))
        };
    }

    if reading < min {
        ActuatorDecision::on(format!("{reading:.1}°C < min {min:.1}°C"))
    } else if reading >= max {
        ActuatorDecision::off(format!("{reading:.1}°C >= max {max:.1}°C"))
    } else {
        ActuatorDecision::off(format!("{reading:.1}°C within {min:.1}°C..{max:.1}°C"))
    }
}

/// First matching rule wins: heater pairing, missing readings, humidity
/// override, then the preset limits.
pub fn fan_decision(
    air_temperature: Option<f32>,
    air_humidity: Option<f32>,
    heater_active: bool,
    config: &ActiveConfiguration,
) -> ActuatorDecision {
    if heater_active {
        return ActuatorDecision::on("paired with heater");
    }

    let (Some(temperature), Some(humidity)) = (air_temperature, air_humidity) else {
        return ActuatorDecision::fault(ControlError::InvalidReading);
    };

    if config.overrides.humidity {
        if let Some(desired) = config.desired.humidity {
            return if humidity > desired {
                ActuatorDecision::on(format!(
                    "override: humidity {humidity:.1}% > desired {desired:.1}%"
                ))
            } else {
                ActuatorDecision::off(format!(
                    "override: humidity {humidity:.1}% <= desired {desired:.1}%"
                ))
            };
        }
    }

    let max_temperature = config.profile.temperature_max;
    let max_humidity = config.profile.humidity_max;

    if let Some(desired) = config.desired.temperature {
        if desired > max_temperature {
            return ActuatorDecision::fault(ControlError::InconsistentConfiguration);
        }
        if temperature > desired {
            return ActuatorDecision::on(format!(
                "temperature {temperature:.1}°C > desired {desired:.1}°C"
            ));
        }
    }

    if temperature >= max_temperature {
        ActuatorDecision::on(format!(
            "temperature {temperature:.1}°C >= max {max_temperature:.1}°C"
        ))
    } else if humidity >= max_humidity {
        ActuatorDecision::on(format!(
            "humidity {humidity:.1}% >= max {max_humidity:.1}%"
        ))
    } else {
        ActuatorDecision::off("normal conditions")
    }
}

/// Photoperiod window `[start, start + hours]` on the wall clock, wrapping
/// past midnight when needed.
pub fn lamp_decision(
    config: &ActiveConfiguration,
    start: NaiveTime,
    now: NaiveTime,
) -> ActuatorDecision {
    let hours = config
        .profile
        .photoperiod_hours
        .filter(|hours| hours.is_finite())
        .unwrap_or(DEFAULT_PHOTOPERIOD_HOURS);

    if hours >= 24.0 {
        return ActuatorDecision::on("continuous 24h photoperiod");
    }

    let seconds = (f64::from(hours.max(0.0)) * 3_600.0).round() as i64;
    let (end, _) = start.overflowing_add_signed(chrono::Duration::seconds(seconds));
    let window = format!("{} -> {}", start.format("%H:%M"), end.format("%H:%M"));

    let inside = if start <= end {
        start <= now && now <= end
    } else {
        now >= start || now <= end
    };

    if inside {
        ActuatorDecision::on(format!("inside photoperiod ({window})"))
    } else {
        ActuatorDecision::off(format!("outside photoperiod ({window})"))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PumpPlan {
    Irrigate { duration: Duration, reason: String },
    Stop { reason: String },
}

impl PumpPlan {
    fn stop(reason: impl Into<String>) -> Self {
        Self::Stop {
            reason: reason.into(),
        }
    }

    pub fn decision(&self) -> ActuatorDecision {
        match self {
            Self::Irrigate { reason, .. } => ActuatorDecision::on(reason.clone()),
            Self::Stop { reason } => ActuatorDecision::off(reason.clone()),
        }
    }
}

/// `since_last_pulse` is the time elapsed since the previous irrigation
/// started, if there was one. The reaction window gate outranks every other
/// rule except a missing reading.
pub fn pump_plan(
    soil_moisture: Option<f32>,
    config: &ActiveConfiguration,
    since_last_pulse: Option<Duration>,
    calibration: &PumpCalibration,
) -> PumpPlan {
    let Some(reading) = soil_moisture else {
        return PumpPlan::stop(ControlError::InvalidReading.to_string());
    };

    if let Some(elapsed) = since_last_pulse {
        if elapsed < calibration.reaction_window {
            let remaining = calibration.reaction_window - elapsed;
            return PumpPlan::stop(format!(
                "waiting for soil reaction ({}s remaining)",
                remaining.as_secs_f64().ceil() as u64
            ));
        }
    }

    let duration = calibration.irrigation_duration();

    if config.overrides.soil_moisture {
        if let Some(desired) = config.desired.soil_moisture {
            return if reading < desired {
                PumpPlan::Irrigate {
                    duration,
                    reason: format!(
                        "override: soil {reading:.1}% < desired {desired:.1}%, irrigating {:.2}s",
                        duration.as_secs_f64()
                    ),
                }
            } else {
                PumpPlan::stop(format!(
                    "override: soil {reading:.1}% >= desired {desired:.1}%"
                ))
            };
        }
    }

    let min = config.profile.soil_moisture_min;
    let max = config.profile.soil_moisture_max;
    if min > max {
        return PumpPlan::stop(ControlError::InconsistentConfiguration.to_string());
    }

    if reading < min {
        PumpPlan::Irrigate {
            duration,
            reason: format!(
                "soil {reading:.1}% < min {min:.1}%, irrigating {:.2}s",
                duration.as_secs_f64()
            ),
        }
    } else if reading > max {
        PumpPlan::stop(format!("soil too wet ({reading:.1}% > {max:.1}%)"))
    } else {
        PumpPlan::stop(format!("soil moisture adequate ({reading:.1}%)"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OverrideFlags, PhaseProfile, Setpoints};
    use crate::types::GrowthPhase;

    fn config() -> ActiveConfiguration {
        ActiveConfiguration {
            system_enabled: true,
            plant: Some("Lettuce".to_string()),
            phase: GrowthPhase::Growth,
            phase_start: None,
            force_advance: false,
            overrides: OverrideFlags::default(),
            profile: PhaseProfile {
                temperature_min: 18.0,
                temperature_max: 26.0,
                soil_moisture_min: 40.0,
                soil_moisture_max: 70.0,
                humidity_max: 85.0,
                photoperiod_hours: Some(12.0),
                required_days: Some(10.0),
                desired: Setpoints::default(),
            },
            desired: Setpoints::default(),
        }
    }

    fn at(hour: u32, minute: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, minute, 0).unwrap()
    }

    fn six_am() -> NaiveTime {
        at(6, 0)
    }

    #[test]
    fn heater_band_without_override() {
        let config = config();
        for reading in [-5.0, 0.0, 17.9] {
            assert!(heater_decision(Some(reading), &config).active);
        }
        for reading in [18.0, 22.0, 25.9, 26.0, 40.0] {
            assert!(!heater_decision(Some(reading), &config).active);
        }
    }

    #[test]
    fn heater_desired_ignores_band() {
        let mut config = config();
        config.desired.temperature = Some(30.0);
        assert!(heater_decision(Some(28.0), &config).active);
        assert!(!heater_decision(Some(30.0), &config).active);

        config.desired.temperature = Some(10.0);
        assert!(!heater_decision(Some(12.0), &config).active);

        config.desired.temperature = Some(50.0);
        assert!(heater_decision(Some(45.0), &config).active);
    }

    #[test]
    fn heater_inverted_band_wins_over_desired() {
        let mut config = config();
        config.profile.temperature_min = 40.0;
        config.profile.temperature_max = 20.0;
        config.desired.temperature = Some(30.0);

        let decision = heater_decision(Some(5.0), &config);
        assert!(!decision.active);
        assert_eq!(decision.reason, "inconsistent configuration");
    }

    #[test]
    fn heater_fails_safe() {
        let mut config = config();
        assert_eq!(
            heater_decision(None, &config).reason,
            ControlError::InvalidReading.to_string()
        );

        config.profile.temperature_min = 30.0;
        config.profile.temperature_max = 20.0;
        let decision = heater_decision(Some(5.0), &config);
        assert!(!decision.active);
        assert_eq!(decision.reason, "inconsistent configuration");
    }

    #[test]
    fn fan_always_runs_with_heater() {
        let mut config = config();
        config.profile.temperature_min = 30.0;
        config.profile.temperature_max = 20.0;

        let first = fan_decision(None, None, true, &config);
        let second = fan_decision(None, None, true, &config);

        assert!(first.active);
        assert_eq!(first, second);
        assert_eq!(first.reason, "paired with heater");
    }

    #[test]
    fn fan_needs_both_readings() {
        let config = config();
        assert!(!fan_decision(Some(40.0), None, false, &config).active);
        assert!(!fan_decision(None, Some(99.0), false, &config).active);
    }

    #[test]
    fn fan_humidity_override_supersedes_preset() {
        let mut config = config();
        config.overrides.humidity = true;
        config.desired.humidity = Some(60.0);

        // Above the preset temperature max, but the override decides.
        let decision = fan_decision(Some(35.0), Some(50.0), false, &config);
        assert!(!decision.active);
        assert!(decision.reason.starts_with("override"));

        assert!(fan_decision(Some(20.0), Some(61.0), false, &config).active);
    }

    #[test]
    fn fan_override_flag_without_value_uses_preset() {
        let mut config = config();
        config.overrides.humidity = true;
        assert!(fan_decision(Some(20.0), Some(90.0), false, &config).active);
        assert!(!fan_decision(Some(20.0), Some(50.0), false, &config).active);
    }

    #[test]
    fn fan_preset_rules() {
        let mut config = config();
        assert!(fan_decision(Some(26.0), Some(50.0), false, &config).active);
        assert!(fan_decision(Some(20.0), Some(85.0), false, &config).active);
        assert_eq!(
            fan_decision(Some(20.0), Some(50.0), false, &config).reason,
            "normal conditions"
        );

        config.desired.temperature = Some(22.0);
        assert!(fan_decision(Some(22.5), Some(50.0), false, &config).active);
        assert!(!fan_decision(Some(22.0), Some(50.0), false, &config).active);

        config.desired.temperature = Some(27.0);
        let decision = fan_decision(Some(30.0), Some(90.0), false, &config);
        assert!(!decision.active);
        assert_eq!(decision.reason, "inconsistent configuration");
    }

    #[test]
    fn lamp_continuous_photoperiod() {
        let mut config = config();
        config.profile.photoperiod_hours = Some(24.0);
        for now in [at(0, 0), at(3, 0), six_am(), at(23, 59)] {
            let decision = lamp_decision(&config, six_am(), now);
            assert!(decision.active);
            assert_eq!(decision.reason, "continuous 24h photoperiod");
        }
    }

    #[test]
    fn lamp_zero_photoperiod_is_a_single_instant() {
        let mut config = config();
        config.profile.photoperiod_hours = Some(0.0);
        assert!(lamp_decision(&config, six_am(), six_am()).active);
        assert!(!lamp_decision(&config, six_am(), NaiveTime::from_hms_opt(6, 0, 1).unwrap()).active);
        assert!(!lamp_decision(&config, six_am(), NaiveTime::from_hms_opt(5, 59, 59).unwrap()).active);
    }

    #[test]
    fn lamp_window_without_wrap() {
        let config = config();
        assert!(!lamp_decision(&config, six_am(), at(5, 59)).active);
        assert!(lamp_decision(&config, six_am(), six_am()).active);
        assert!(lamp_decision(&config, six_am(), at(18, 0)).active);
        assert!(!lamp_decision(&config, six_am(), at(18, 1)).active);
    }

    #[test]
    fn lamp_window_wraps_past_midnight() {
        let mut config = config();
        config.profile.photoperiod_hours = Some(20.0);

        for now in [six_am(), at(12, 0), at(23, 59), at(0, 0), at(1, 30), at(2, 0)] {
            assert!(lamp_decision(&config, six_am(), now).active, "{now}");
        }
        for now in [at(2, 1), at(4, 0), at(5, 59)] {
            assert!(!lamp_decision(&config, six_am(), now).active, "{now}");
        }
    }

    #[test]
    fn lamp_defaults_to_twelve_hours() {
        let mut config = config();
        config.profile.photoperiod_hours = None;
        assert!(lamp_decision(&config, six_am(), at(18, 0)).active);
        assert!(!lamp_decision(&config, six_am(), at(19, 0)).active);
    }

    #[test]
    fn pump_waits_for_reaction_window() {
        let config = config();
        let calibration = PumpCalibration::default();

        for elapsed in [0, 1, 60, 119] {
            let plan = pump_plan(
                Some(0.0),
                &config,
                Some(Duration::from_secs(elapsed)),
                &calibration,
            );
            match plan {
                PumpPlan::Stop { reason } => assert!(reason.starts_with("waiting"), "{reason}"),
                other => panic!("expected stop, got {other:?}"),
            }
        }

        let plan = pump_plan(
            Some(0.0),
            &config,
            Some(Duration::from_secs(120)),
            &calibration,
        );
        assert!(matches!(plan, PumpPlan::Irrigate { .. }));
    }

    #[test]
    fn pump_reports_remaining_wait() {
        let plan = pump_plan(
            Some(10.0),
            &config(),
            Some(Duration::from_secs(90)),
            &PumpCalibration::default(),
        );
        assert_eq!(
            plan,
            PumpPlan::Stop {
                reason: "waiting for soil reaction (30s remaining)".to_string()
            }
        );
    }

    #[test]
    fn pump_band_rules() {
        let config = config();
        let calibration = PumpCalibration::default();

        match pump_plan(Some(39.0), &config, None, &calibration) {
            PumpPlan::Irrigate { duration, .. } => {
                assert_eq!(duration, Duration::from_secs_f64(100.0 / 1.31));
            }
            other => panic!("expected irrigation, got {other:?}"),
        }
        assert!(!pump_plan(Some(55.0), &config, None, &calibration)
            .decision()
            .active);
        assert!(!pump_plan(Some(71.0), &config, None, &calibration)
            .decision()
            .active);
        assert!(!pump_plan(None, &config, None, &calibration)
            .decision()
            .active);
    }

    #[test]
    fn pump_override_replaces_band() {
        let mut config = config();
        config.overrides.soil_moisture = true;
        config.desired.soil_moisture = Some(75.0);
        let calibration = PumpCalibration::default();

        assert!(pump_plan(Some(72.0), &config, None, &calibration)
            .decision()
            .active);
        assert!(!pump_plan(Some(75.0), &config, None, &calibration)
            .decision()
            .active);
    }

    #[test]
    fn pump_inconsistent_band_stays_off() {
        let mut config = config();
        config.profile.soil_moisture_min = 80.0;
        config.profile.soil_moisture_max = 20.0;
        let plan = pump_plan(Some(5.0), &config, None, &PumpCalibration::default());
        assert_eq!(plan.decision().reason, "inconsistent configuration");
    }
}
