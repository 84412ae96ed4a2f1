use std::{
    collections::BTreeMap,
    sync::{Mutex, MutexGuard},
};

use chrono::{DateTime, Utc};
use rumqttc::{AsyncClient, QoS};
use serde::Serialize;
use tracing::{debug, info, warn};

use greenhouse_common::{
    actuator_topic, ActuatorDecision, ActuatorId, ActuatorStatePayload, GrowthPhase,
    PhaseStatePayload, RequestResultPayload, RequestStatus, SensorAveragesPayload,
    SensorSnapshot, TOPIC_CONTROLLER_PHASE, TOPIC_CONTROLLER_REQUEST, TOPIC_CONTROLLER_SENSORS,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseStatus {
    pub phase: GrowthPhase,
    #[serde(rename = "phaseStartEpoch")]
    pub phase_start_epoch: Option<i64>,
}

/// Last reported state of every actuator, the current phase, the latest
/// sensor averages and the latest request result. Mirrors each report to
/// MQTT when a client is attached.
pub struct StatusBoard {
    greenhouse_id: String,
    actuators: Mutex<BTreeMap<ActuatorId, ActuatorDecision>>,
    phase: Mutex<Option<PhaseStatus>>,
    sensor_averages: Mutex<Option<SensorAveragesPayload>>,
    last_request: Mutex<Option<RequestResultPayload>>,
    mqtt: Option<AsyncClient>,
}

impl StatusBoard {
    pub fn new(greenhouse_id: impl Into<String>, mqtt: Option<AsyncClient>) -> Self {
        Self {
            greenhouse_id: greenhouse_id.into(),
            actuators: Mutex::new(BTreeMap::new()),
            phase: Mutex::new(None),
            sensor_averages: Mutex::new(None),
            last_request: Mutex::new(None),
            mqtt,
        }
    }

    pub fn report_actuator_state(&self, actuator: ActuatorId, decision: &ActuatorDecision) {
        let previous = lock(&self.actuators).insert(actuator, decision.clone());
        if previous.as_ref() != Some(decision) {
            debug!(%actuator, active = decision.active, reason = %decision.reason, "actuator state");
        }

        let payload = ActuatorStatePayload {
            greenhouse: self.greenhouse_id.clone(),
            actuator: actuator.as_str(),
            active: decision.active,
            reason: decision.reason.clone(),
        };
        self.publish(actuator_topic(actuator), true, &payload);
    }

    pub fn report_phase(&self, phase: GrowthPhase, phase_start: Option<DateTime<Utc>>) {
        let phase_start_epoch = phase_start.map(|start| start.timestamp());
        *lock(&self.phase) = Some(PhaseStatus {
            phase,
            phase_start_epoch,
        });

        let payload = PhaseStatePayload {
            greenhouse: self.greenhouse_id.clone(),
            phase: phase.as_str(),
            phase_start_epoch,
        };
        self.publish(TOPIC_CONTROLLER_PHASE.to_string(), true, &payload);
    }

    pub fn report_sensor_averages(&self, averages: SensorSnapshot, at: DateTime<Utc>) {
        let payload = SensorAveragesPayload {
            greenhouse: self.greenhouse_id.clone(),
            averages,
            timestamp_epoch: at.timestamp(),
        };
        debug!(?averages, "sensor averages");
        self.publish(TOPIC_CONTROLLER_SENSORS.to_string(), true, &payload);
        *lock(&self.sensor_averages) = Some(payload);
    }

    /// `error` is `None` when the request was carried out.
    pub fn report_request(&self, request: &'static str, error: Option<String>) {
        let status = match &error {
            None => {
                info!(request, "request confirmed");
                RequestStatus::Confirmed
            }
            Some(err) => {
                warn!(request, "request failed: {err}");
                RequestStatus::Error
            }
        };

        let payload = RequestResultPayload {
            greenhouse: self.greenhouse_id.clone(),
            request,
            status,
            error,
        };
        self.publish(TOPIC_CONTROLLER_REQUEST.to_string(), false, &payload);
        *lock(&self.last_request) = Some(payload);
    }

    #[cfg(test)]
    pub fn actuator(&self, actuator: ActuatorId) -> Option<ActuatorDecision> {
        lock(&self.actuators).get(&actuator).cloned()
    }

    pub fn actuators(&self) -> Vec<(ActuatorId, ActuatorDecision)> {
        lock(&self.actuators)
            .iter()
            .map(|(id, decision)| (*id, decision.clone()))
            .collect()
    }

    pub fn phase(&self) -> Option<PhaseStatus> {
        lock(&self.phase).clone()
    }

    pub fn sensor_averages(&self) -> Option<SensorAveragesPayload> {
        lock(&self.sensor_averages).clone()
    }

    pub fn last_request(&self) -> Option<RequestResultPayload> {
        lock(&self.last_request).clone()
    }

    fn publish<T: Serialize>(&self, topic: String, retain: bool, payload: &T) {
        let Some(mqtt) = &self.mqtt else {
            return;
        };
        match serde_json::to_vec(payload) {
            Ok(body) => {
                if let Err(err) = mqtt.try_publish(topic.as_str(), QoS::AtLeastOnce, retain, body) {
                    warn!("status publish to {topic} failed: {err}");
                }
            }
            Err(err) => warn!("status serialization failed: {err}"),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
