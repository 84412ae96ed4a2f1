use std::time::Duration;

use anyhow::Context;
use rumqttc::{AsyncClient, LastWill, MqttOptions, QoS};
use tracing::{debug, info, warn};

use greenhouse_common::{
    TOPIC_SENSOR_AIR_HUMIDITY, TOPIC_SENSOR_AIR_TEMPERATURE, TOPIC_SENSOR_LIGHT,
    TOPIC_SENSOR_SOIL_MOISTURE, TOPIC_SENSOR_SOIL_TEMPERATURE, TOPIC_SENSOR_STATUS,
};

const PUBLISH_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq)]
struct Readings {
    air_temperature: f32,
    air_humidity: f32,
    soil_temperature: f32,
    soil_moisture: f32,
    light: f32,
}

impl Readings {
    /// Slow deterministic drift around plausible greenhouse values. Soil
    /// dries a little every tick and is topped back up every 90 ticks.
    fn simulated(tick: u64) -> Self {
        Self {
            air_temperature: 21.0 + (tick % 10) as f32 * 0.4,
            air_humidity: 60.0 + (tick % 12) as f32 * 2.0,
            soil_temperature: 19.0 + (tick % 8) as f32 * 0.25,
            soil_moisture: 65.0 - (tick % 90) as f32 * 0.5,
            light: if tick % 360 < 180 { 12_000.0 } else { 0.0 },
        }
    }

    fn payloads(&self) -> [(&'static str, String); 5] {
        [
            (TOPIC_SENSOR_AIR_TEMPERATURE, format!("{:.1}", self.air_temperature)),
            (TOPIC_SENSOR_AIR_HUMIDITY, format!("{:.1}", self.air_humidity)),
            (TOPIC_SENSOR_SOIL_TEMPERATURE, format!("{:.1}", self.soil_temperature)),
            (TOPIC_SENSOR_SOIL_MOISTURE, format!("{:.1}", self.soil_moisture)),
            (TOPIC_SENSOR_LIGHT, format!("{:.0}", self.light)),
        ]
    }
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mqtt_host = std::env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let mqtt_port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(1883);

    let mut mqtt_options = MqttOptions::new("greenhouse-sensor", mqtt_host, mqtt_port);
    mqtt_options.set_last_will(LastWill::new(
        TOPIC_SENSOR_STATUS,
        "offline",
        QoS::AtLeastOnce,
        true,
    ));

    if let Ok(user) = std::env::var("MQTT_USER") {
        let pass = std::env::var("MQTT_PASS").unwrap_or_default();
        mqtt_options.set_credentials(user, pass);
    }

    let (mqtt, mut eventloop) = AsyncClient::new(mqtt_options, 32);

    mqtt.publish(TOPIC_SENSOR_STATUS, QoS::AtLeastOnce, true, "online")
        .await
        .context("failed to publish sensor online status")?;

    tokio::spawn(async move {
        loop {
            if let Err(err) = eventloop.poll().await {
                warn!("sensor mqtt poll error: {err}");
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    });

    info!("sensor publisher started");

    let mut tick: u64 = 0;
    let mut interval = tokio::time::interval(PUBLISH_INTERVAL);

    loop {
        interval.tick().await;
        tick = tick.saturating_add(1);

        // Probe drivers replace the simulated readings on real hardware.
        let readings = Readings::simulated(tick);
        debug!(?readings, "publishing readings");

        for (topic, payload) in readings.payloads() {
            mqtt.publish(topic, QoS::AtLeastOnce, false, payload)
                .await
                .with_context(|| format!("failed to publish {topic}"))?;
        }
    }
}
