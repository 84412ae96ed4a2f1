use std::sync::Arc;

use anyhow::Context;
use serde::Deserialize;
use tracing::{debug, info};

use greenhouse_common::{
    GrowthPhase, OverrideVariable, TOPIC_CMD_ADVANCE, TOPIC_CMD_OVERRIDE, TOPIC_CMD_RESTART,
    TOPIC_CMD_START,
};

use crate::{
    phases::{EngineError, PhaseEngine},
    signal::ResetSignal,
    status::StatusBoard,
    store::{GreenhouseStore, StoreError},
};

/// Events any transport (HTTP, MQTT) can deliver to the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum ExternalRequest {
    Start {
        plant: String,
        phase: GrowthPhase,
    },
    ForcedAdvance,
    Restart,
    OverrideChanged {
        variable: OverrideVariable,
        enabled: bool,
        desired: Option<f32>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RequestOutcome {
    Started(GrowthPhase),
    Advanced(GrowthPhase),
    Restarted,
    OverrideStored { reset: bool },
}

#[derive(Debug, Deserialize)]
struct StartCommand {
    plant: String,
    phase: String,
}

#[derive(Debug, Deserialize)]
pub struct OverrideCommand {
    pub enabled: bool,
    #[serde(default)]
    pub desired: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct OverrideMessage {
    variable: OverrideVariable,
    #[serde(flatten)]
    command: OverrideCommand,
}

impl ExternalRequest {
    pub fn override_changed(variable: OverrideVariable, command: OverrideCommand) -> Self {
        Self::OverrideChanged {
            variable,
            enabled: command.enabled,
            desired: command.desired,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::ForcedAdvance => "advance",
            Self::Restart => "restart",
            Self::OverrideChanged { .. } => "override",
        }
    }

    /// `Ok(None)` for topics that carry no request.
    pub fn from_mqtt(topic: &str, message: &str) -> anyhow::Result<Option<Self>> {
        let request = match topic {
            TOPIC_CMD_START => {
                let command: StartCommand =
                    serde_json::from_str(message).context("invalid start command")?;
                let phase = command
                    .phase
                    .parse::<GrowthPhase>()
                    .map_err(anyhow::Error::msg)?;
                Self::Start {
                    plant: command.plant,
                    phase,
                }
            }
            TOPIC_CMD_ADVANCE => Self::ForcedAdvance,
            TOPIC_CMD_RESTART => Self::Restart,
            TOPIC_CMD_OVERRIDE => {
                let message: OverrideMessage =
                    serde_json::from_str(message).context("invalid override command")?;
                Self::override_changed(message.variable, message.command)
            }
            _ => return Ok(None),
        };
        Ok(Some(request))
    }
}

fn command_name(topic: &str) -> &'static str {
    match topic {
        TOPIC_CMD_START => "start",
        TOPIC_CMD_ADVANCE => "advance",
        TOPIC_CMD_RESTART => "restart",
        TOPIC_CMD_OVERRIDE => "override",
        _ => "unknown",
    }
}

/// Parses and handles one MQTT command, then reports the result back to the
/// requester. `Ok(None)` for topics that carry no request.
pub async fn handle_command(
    engine: &Arc<PhaseEngine>,
    store: &GreenhouseStore,
    reset: &ResetSignal,
    status: &StatusBoard,
    topic: &str,
    message: &str,
) -> anyhow::Result<Option<RequestOutcome>> {
    let request = match ExternalRequest::from_mqtt(topic, message) {
        Ok(Some(request)) => request,
        Ok(None) => return Ok(None),
        Err(err) => {
            status.report_request(command_name(topic), Some(format!("{err:#}")));
            return Err(err);
        }
    };

    let name = request.name();
    match handle_request(engine, store, reset, request).await {
        Ok(outcome) => {
            status.report_request(name, None);
            Ok(Some(outcome))
        }
        Err(err) => {
            status.report_request(name, Some(err.to_string()));
            Err(err.into())
        }
    }
}

pub async fn handle_request(
    engine: &Arc<PhaseEngine>,
    store: &GreenhouseStore,
    reset: &ResetSignal,
    request: ExternalRequest,
) -> Result<RequestOutcome, EngineError> {
    match request {
        ExternalRequest::Start { plant, phase } => {
            engine.start(&plant, phase).await?;
            Ok(RequestOutcome::Started(phase))
        }
        ExternalRequest::ForcedAdvance => {
            let phase = engine.force_advance().await?;
            Ok(RequestOutcome::Advanced(phase))
        }
        ExternalRequest::Restart => {
            engine.restart().await?;
            Ok(RequestOutcome::Restarted)
        }
        ExternalRequest::OverrideChanged {
            variable,
            enabled,
            desired,
        } => {
            if desired.is_some_and(|value| !value.is_finite()) {
                return Err(EngineError::InvalidRequest(format!(
                    "desired value for {variable:?} must be a finite number"
                )));
            }

            let running = store
                .update(|doc| {
                    let setting = doc.overrides.get_mut(variable);
                    setting.enabled = enabled;
                    if desired.is_some() {
                        setting.desired = desired;
                    }
                    Ok::<_, StoreError>(doc.is_running())
                })
                .await?;

            if running {
                info!(?variable, enabled, ?desired, "override changed, re-evaluating");
                reset.set();
            } else {
                debug!(?variable, enabled, "override stored while greenhouse idle");
            }
            Ok(RequestOutcome::OverrideStored { reset: running })
        }
    }
}
