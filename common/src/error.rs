use thiserror::Error;

use crate::types::GrowthPhase;

/// Control faults. The display strings double as actuator decision reasons.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlError {
    #[error("invalid reading")]
    InvalidReading,

    #[error("inconsistent configuration")]
    InconsistentConfiguration,

    #[error("configuration unavailable")]
    ConfigurationUnavailable,

    #[error("no phase follows {0}")]
    NoNextPhase(GrowthPhase),

    #[error("cancelled transition fired")]
    SchedulingRace,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("greenhouse not found: {0}")]
    GreenhouseNotFound(String),

    #[error("preset not found for {plant}/{phase}")]
    PresetNotFound { plant: String, phase: GrowthPhase },

    #[error("invalid greenhouse configuration: {0}")]
    Invalid(String),
}
