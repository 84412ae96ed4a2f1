pub mod actuators;
pub mod config;
pub mod error;
pub mod phase;
pub mod topics;
pub mod types;

pub use actuators::{fan_decision, heater_decision, lamp_decision, pump_plan, PumpPlan};
pub use config::{
    resolve, ActiveConfiguration, ControllerConfig, GreenhouseDocument, OverrideSetting,
    OverrideVariable, PhaseProfile, PresetBook, PumpCalibration, RuntimeConfig,
};
pub use error::{ControlError, ResolveError};
pub use phase::{due_transition, next_deadline};
pub use topics::*;
pub use types::{
    ActuatorDecision, ActuatorId, ActuatorStatePayload, GrowthPhase, PhaseStatePayload,
    RequestResultPayload, RequestStatus, SensorAveragesPayload, SensorSnapshot,
};
