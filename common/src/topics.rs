pub const TOPIC_SENSOR_AIR_TEMPERATURE: &str = "greenhouse/sensor/air_temperature";
pub const TOPIC_SENSOR_AIR_HUMIDITY: &str = "greenhouse/sensor/air_humidity";
pub const TOPIC_SENSOR_SOIL_TEMPERATURE: &str = "greenhouse/sensor/soil_temperature";
pub const TOPIC_SENSOR_SOIL_MOISTURE: &str = "greenhouse/sensor/soil_moisture";
pub const TOPIC_SENSOR_LIGHT: &str = "greenhouse/sensor/light";
pub const TOPIC_SENSOR_STATUS: &str = "greenhouse/sensor/status";

pub const TOPIC_CONTROLLER_ACTUATOR_PREFIX: &str = "greenhouse/controller/actuator";
pub const TOPIC_CONTROLLER_PHASE: &str = "greenhouse/controller/phase";
pub const TOPIC_CONTROLLER_SENSORS: &str = "greenhouse/controller/sensors";
pub const TOPIC_CONTROLLER_REQUEST: &str = "greenhouse/controller/request";

pub const TOPIC_CMD_START: &str = "greenhouse/cmnd/start";
pub const TOPIC_CMD_ADVANCE: &str = "greenhouse/cmnd/advance";
pub const TOPIC_CMD_RESTART: &str = "greenhouse/cmnd/restart";
pub const TOPIC_CMD_OVERRIDE: &str = "greenhouse/cmnd/override";

pub fn actuator_topic(actuator: crate::ActuatorId) -> String {
    format!("{TOPIC_CONTROLLER_ACTUATOR_PREFIX}/{}", actuator.as_str())
}
