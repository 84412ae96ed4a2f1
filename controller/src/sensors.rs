use std::{
    collections::{HashMap, VecDeque},
    ops::RangeInclusive,
    time::Duration,
};

use tokio::{sync::Mutex, time::Instant};

use greenhouse_common::{
    SensorSnapshot, TOPIC_SENSOR_AIR_HUMIDITY, TOPIC_SENSOR_AIR_TEMPERATURE, TOPIC_SENSOR_LIGHT,
    TOPIC_SENSOR_SOIL_MOISTURE, TOPIC_SENSOR_SOIL_TEMPERATURE,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorKind {
    AirTemperature,
    AirHumidity,
    SoilTemperature,
    SoilMoisture,
    Light,
}

impl SensorKind {
    pub fn from_topic(topic: &str) -> Option<Self> {
        match topic {
            TOPIC_SENSOR_AIR_TEMPERATURE => Some(Self::AirTemperature),
            TOPIC_SENSOR_AIR_HUMIDITY => Some(Self::AirHumidity),
            TOPIC_SENSOR_SOIL_TEMPERATURE => Some(Self::SoilTemperature),
            TOPIC_SENSOR_SOIL_MOISTURE => Some(Self::SoilMoisture),
            TOPIC_SENSOR_LIGHT => Some(Self::Light),
            _ => None,
        }
    }

    fn valid_range(self) -> RangeInclusive<f32> {
        match self {
            Self::AirTemperature | Self::SoilTemperature => -40.0..=85.0,
            Self::AirHumidity | Self::SoilMoisture => 0.0..=100.0,
            Self::Light => 0.0..=200_000.0,
        }
    }
}

/// Light samples needed before the buffered readings are averaged.
pub const AVERAGE_MIN_LIGHT_SAMPLES: usize = 5;

const BUFFER_CAPACITY: usize = 240;

#[derive(Debug, Clone, Copy)]
struct Sample {
    value: f32,
    at: Instant,
}

#[derive(Debug, Default)]
struct Readings {
    latest: HashMap<SensorKind, Sample>,
    buffered: HashMap<SensorKind, VecDeque<f32>>,
}

/// Latest value per sensor plus a bounded buffer of every accepted reading
/// since the last average. Readings older than `stale_after` are reported
/// as absent.
#[derive(Debug)]
pub struct SensorCache {
    stale_after: Duration,
    readings: Mutex<Readings>,
}

impl SensorCache {
    pub fn new(stale_after: Duration) -> Self {
        Self {
            stale_after,
            readings: Mutex::new(Readings::default()),
        }
    }

    /// Returns `false` when the value is rejected as physically impossible.
    pub async fn record(&self, kind: SensorKind, value: f32) -> bool {
        if !value.is_finite() || !kind.valid_range().contains(&value) {
            return false;
        }
        let mut readings = self.readings.lock().await;
        readings.latest.insert(
            kind,
            Sample {
                value,
                at: Instant::now(),
            },
        );
        let buffer = readings.buffered.entry(kind).or_default();
        if buffer.len() == BUFFER_CAPACITY {
            buffer.pop_front();
        }
        buffer.push_back(value);
        true
    }

    pub async fn snapshot(&self) -> SensorSnapshot {
        let readings = self.readings.lock().await;
        let fresh = |kind: SensorKind| {
            readings
                .latest
                .get(&kind)
                .filter(|sample| sample.at.elapsed() < self.stale_after)
                .map(|sample| sample.value)
        };

        SensorSnapshot {
            air_temperature: fresh(SensorKind::AirTemperature),
            air_humidity: fresh(SensorKind::AirHumidity),
            soil_temperature: fresh(SensorKind::SoilTemperature),
            soil_moisture: fresh(SensorKind::SoilMoisture),
            light: fresh(SensorKind::Light),
        }
    }

    /// Averages and clears the buffers once enough light samples have
    /// accumulated. Sensors with no buffered readings average to `None`.
    pub async fn take_averages(&self) -> Option<SensorSnapshot> {
        let mut readings = self.readings.lock().await;
        let light_samples = readings
            .buffered
            .get(&SensorKind::Light)
            .map_or(0, VecDeque::len);
        if light_samples < AVERAGE_MIN_LIGHT_SAMPLES {
            return None;
        }

        let buffered = std::mem::take(&mut readings.buffered);
        let mean = |kind: SensorKind| {
            buffered
                .get(&kind)
                .filter(|values| !values.is_empty())
                .map(|values| values.iter().sum::<f32>() / values.len() as f32)
        };

        Some(SensorSnapshot {
            air_temperature: mean(SensorKind::AirTemperature),
            air_humidity: mean(SensorKind::AirHumidity),
            soil_temperature: mean(SensorKind::SoilTemperature),
            soil_moisture: mean(SensorKind::SoilMoisture),
            light: mean(SensorKind::Light),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn readings_expire() {
        let cache = SensorCache::new(Duration::from_secs(120));
        assert!(cache.record(SensorKind::SoilMoisture, 42.0).await);
        assert!(cache.record(SensorKind::AirTemperature, 21.5).await);

        let snapshot = cache.snapshot().await;
        assert_eq!(snapshot.soil_moisture, Some(42.0));
        assert_eq!(snapshot.air_humidity, None);

        tokio::time::advance(Duration::from_secs(120)).await;
        assert_eq!(cache.snapshot().await, SensorSnapshot::default());
    }

    #[tokio::test]
    async fn rejects_impossible_values() {
        let cache = SensorCache::new(Duration::from_secs(120));
        assert!(!cache.record(SensorKind::AirHumidity, 140.0).await);
        assert!(!cache.record(SensorKind::AirTemperature, f32::NAN).await);
        assert_eq!(cache.snapshot().await.air_humidity, None);
    }

    #[tokio::test]
    async fn averages_once_enough_light_samples() {
        let cache = SensorCache::new(Duration::from_secs(120));
        for lux in [1000.0, 1100.0, 1200.0, 1300.0] {
            cache.record(SensorKind::Light, lux).await;
        }
        cache.record(SensorKind::AirTemperature, 20.0).await;
        cache.record(SensorKind::AirTemperature, 24.0).await;
        assert_eq!(cache.take_averages().await, None);

        cache.record(SensorKind::Light, 1400.0).await;
        let averages = cache.take_averages().await.unwrap();
        assert_eq!(averages.light, Some(1200.0));
        assert_eq!(averages.air_temperature, Some(22.0));
        assert_eq!(averages.soil_moisture, None);

        // Buffers start over; the latest values stay available.
        assert_eq!(cache.take_averages().await, None);
        assert_eq!(cache.snapshot().await.light, Some(1400.0));
    }

    #[tokio::test]
    async fn rejected_values_are_not_averaged() {
        let cache = SensorCache::new(Duration::from_secs(120));
        cache.record(SensorKind::AirHumidity, 140.0).await;
        for _ in 0..AVERAGE_MIN_LIGHT_SAMPLES {
            cache.record(SensorKind::Light, 500.0).await;
        }
        assert_eq!(cache.take_averages().await.unwrap().air_humidity, None);
    }

    #[tokio::test]
    async fn buffer_keeps_most_recent_readings() {
        let cache = SensorCache::new(Duration::from_secs(120));
        cache.record(SensorKind::SoilMoisture, 0.0).await;
        for _ in 0..BUFFER_CAPACITY {
            cache.record(SensorKind::SoilMoisture, 50.0).await;
        }
        for _ in 0..AVERAGE_MIN_LIGHT_SAMPLES {
            cache.record(SensorKind::Light, 500.0).await;
        }
        assert_eq!(cache.take_averages().await.unwrap().soil_moisture, Some(50.0));
    }

    #[test]
    fn maps_topics() {
        assert_eq!(
            SensorKind::from_topic(TOPIC_SENSOR_SOIL_MOISTURE),
            Some(SensorKind::SoilMoisture)
        );
        assert_eq!(SensorKind::from_topic("greenhouse/sensor/unknown"), None);
    }
}
