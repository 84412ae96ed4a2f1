use chrono::{DateTime, Duration, Utc};

use crate::{config::ActiveConfiguration, types::GrowthPhase};

pub const SECONDS_PER_DAY: f64 = 86_400.0;

pub fn elapsed_days(phase_start: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    (now - phase_start).num_milliseconds() as f64 / (SECONDS_PER_DAY * 1_000.0)
}

/// Instant at which a phase started at `phase_start` has lasted
/// `required_days`. `None` for a missing or non-positive duration.
pub fn phase_deadline(phase_start: DateTime<Utc>, required_days: f64) -> Option<DateTime<Utc>> {
    if !required_days.is_finite() || required_days <= 0.0 {
        return None;
    }
    let millis = (required_days * SECONDS_PER_DAY * 1_000.0).round() as i64;
    phase_start.checked_add_signed(Duration::milliseconds(millis))
}

/// The phase the configuration should move to at `now`, if its required
/// time has elapsed.
pub fn due_transition(config: &ActiveConfiguration, now: DateTime<Utc>) -> Option<GrowthPhase> {
    if config.phase.is_paused() || config.plant.is_none() {
        return None;
    }
    let phase_start = config.phase_start?;
    let required_days = config.profile.required_days?;

    if elapsed_days(phase_start, now) < required_days {
        return None;
    }
    config.phase.next()
}

/// Deadline for the automatic advance out of the configured phase.
pub fn next_deadline(config: &ActiveConfiguration) -> Option<DateTime<Utc>> {
    if config.phase.is_paused() || config.plant.is_none() {
        return None;
    }
    phase_deadline(config.phase_start?, config.profile.required_days?)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::config::{OverrideFlags, PhaseProfile, Setpoints};

    fn growth_started(start: DateTime<Utc>) -> ActiveConfiguration {
        ActiveConfiguration {
            system_enabled: true,
            plant: Some("Lettuce".to_string()),
            phase: GrowthPhase::Growth,
            phase_start: Some(start),
            force_advance: false,
            overrides: OverrideFlags::default(),
            profile: PhaseProfile {
                required_days: Some(10.0),
                ..PhaseProfile::default()
            },
            desired: Setpoints::default(),
        }
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn not_due_before_required_days() {
        let config = growth_started(start());
        let now = start() + Duration::days(10) - Duration::seconds(1);
        assert_eq!(due_transition(&config, now), None);
    }

    #[test]
    fn due_exactly_at_required_days() {
        let config = growth_started(start());
        assert_eq!(
            due_transition(&config, start() + Duration::days(10)),
            Some(GrowthPhase::Flowering)
        );
    }

    #[test]
    fn paused_or_incomplete_configs_never_advance() {
        let late = start() + Duration::days(400);

        let mut config = growth_started(start());
        config.phase = GrowthPhase::Harvest;
        assert_eq!(due_transition(&config, late), None);

        let mut config = growth_started(start());
        config.phase = GrowthPhase::Standby;
        assert_eq!(due_transition(&config, late), None);

        let mut config = growth_started(start());
        config.phase_start = None;
        assert_eq!(due_transition(&config, late), None);

        let mut config = growth_started(start());
        config.profile.required_days = None;
        assert_eq!(due_transition(&config, late), None);
    }

    #[test]
    fn deadline_handles_fractional_days() {
        let config = {
            let mut config = growth_started(start());
            config.profile.required_days = Some(1.5);
            config
        };
        assert_eq!(
            next_deadline(&config),
            Some(start() + Duration::hours(36))
        );
    }

    #[test]
    fn zero_day_phase_has_no_deadline() {
        assert_eq!(phase_deadline(start(), 0.0), None);
        assert_eq!(phase_deadline(start(), f64::NAN), None);
    }
}
