use std::{sync::Arc, time::Duration};

use chrono::NaiveTime;
use chrono_tz::Tz;
use tracing::{debug, info, warn};

use greenhouse_common::{
    fan_decision, heater_decision, lamp_decision, ActiveConfiguration, ActuatorDecision,
    ActuatorId, ControlError, ControllerConfig, GrowthPhase, ResolveError, SensorSnapshot,
};

use crate::{
    clock::Clock,
    phases::{EngineError, PhaseEngine},
    pump::Pump,
    relays::RelayBank,
    sensors::SensorCache,
    signal::ResetSignal,
    status::StatusBoard,
    store::{GreenhouseStore, StoreError},
};

pub type Decisions = Vec<(ActuatorId, ActuatorDecision)>;

/// Shared collaborators the control loop drives.
pub struct CycleDeps {
    pub store: Arc<GreenhouseStore>,
    pub engine: Arc<PhaseEngine>,
    pub sensors: Arc<SensorCache>,
    pub relays: Arc<dyn RelayBank>,
    pub status: Arc<StatusBoard>,
    pub reset: Arc<ResetSignal>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    /// `None` when the configuration could not be resolved.
    pub phase: Option<GrowthPhase>,
    pub advanced_to: Option<GrowthPhase>,
    pub decisions: Decisions,
}

/// The only writer of heater, fan and lamp relays. Each tick resolves the
/// configuration, advances the phase if due, reads the sensors and applies
/// all four actuator decisions, then sleeps until the next poll or a reset.
pub struct ControlCycle {
    store: Arc<GreenhouseStore>,
    engine: Arc<PhaseEngine>,
    sensors: Arc<SensorCache>,
    relays: Arc<dyn RelayBank>,
    status: Arc<StatusBoard>,
    reset: Arc<ResetSignal>,
    clock: Arc<dyn Clock>,
    pump: Pump,
    poll_interval: Duration,
    photoperiod_start: NaiveTime,
    timezone: Tz,
}

impl ControlCycle {
    pub fn new(deps: CycleDeps, settings: &ControllerConfig, timezone: Tz) -> Self {
        let pump = Pump::new(Arc::clone(&deps.relays), settings.pump_calibration());
        Self {
            store: deps.store,
            engine: deps.engine,
            sensors: deps.sensors,
            relays: deps.relays,
            status: deps.status,
            reset: deps.reset,
            clock: deps.clock,
            pump,
            poll_interval: settings.poll_interval(),
            photoperiod_start: settings.photoperiod_start(),
            timezone,
        }
    }

    pub async fn run(self: Arc<Self>) {
        info!(
            "control loop started, polling every {}s",
            self.poll_interval.as_secs()
        );
        loop {
            let report = self.run_tick().await;
            debug!(phase = ?report.phase, advanced_to = ?report.advanced_to, "tick complete");

            if self.reset.wait(self.poll_interval).await {
                debug!("woken by reset signal");
            }
        }
    }

    pub async fn run_tick(&self) -> TickReport {
        if let Some(averages) = self.sensors.take_averages().await {
            self.status.report_sensor_averages(averages, self.clock.now());
        }

        let mut config = match self.store.resolve().await {
            Ok(config) => config,
            Err(err) => return self.fail_safe(err).await,
        };

        let advanced_to = self.advance_phase(&config).await;
        if advanced_to.is_some() {
            config = match self.store.resolve().await {
                Ok(config) => config,
                Err(err) => return self.fail_safe(err).await,
            };
        }

        let snapshot = self.sensors.snapshot().await;
        let decisions = self.decide(&config, &snapshot).await;
        self.emit(&decisions);

        TickReport {
            phase: Some(config.phase),
            advanced_to,
            decisions,
        }
    }

    /// Switches everything off and reports it.
    pub async fn all_off(&self, reason: &str) -> Decisions {
        self.pump.turn_off().await;
        let decisions = off_decisions(reason);
        self.emit(&decisions);
        decisions
    }

    async fn fail_safe(&self, err: ResolveError) -> TickReport {
        warn!("configuration unavailable: {err}");
        let decisions = self
            .all_off(&ControlError::ConfigurationUnavailable.to_string())
            .await;
        TickReport {
            phase: None,
            advanced_to: None,
            decisions,
        }
    }

    async fn advance_phase(&self, config: &ActiveConfiguration) -> Option<GrowthPhase> {
        if config.force_advance {
            return match self.engine.force_advance().await {
                Ok(phase) => Some(phase),
                Err(EngineError::Control(ControlError::NoNextPhase(phase))) => {
                    warn!(%phase, "forced advance requested but no phase follows");
                    let cleared = self
                        .store
                        .update(|doc| {
                            doc.force_advance = false;
                            Ok::<_, StoreError>(())
                        })
                        .await;
                    if let Err(err) = cleared {
                        warn!("failed to clear forced advance flag: {err}");
                    }
                    None
                }
                Err(err) => {
                    warn!("forced phase advance failed: {err}");
                    None
                }
            };
        }

        match self.engine.verify_and_advance(config).await {
            Ok(advanced) => advanced,
            Err(err) => {
                warn!("phase advance check failed: {err}");
                None
            }
        }
    }

    async fn decide(&self, config: &ActiveConfiguration, sensors: &SensorSnapshot) -> Decisions {
        if let Some(reason) = gate_reason(config) {
            debug!(reason, "actuators gated off");
            self.pump.turn_off().await;
            return off_decisions(reason);
        }

        let heater = heater_decision(sensors.air_temperature, config);
        let fan = fan_decision(
            sensors.air_temperature,
            sensors.air_humidity,
            heater.active,
            config,
        );
        let local_now = self.clock.now().with_timezone(&self.timezone).time();
        let lamp = lamp_decision(config, self.photoperiod_start, local_now);
        let pump = self.pump.control(sensors.soil_moisture, config).await;

        vec![
            (ActuatorId::Heater, heater),
            (ActuatorId::Fan, fan),
            (ActuatorId::Lamp, lamp),
            (ActuatorId::Pump, pump),
        ]
    }

    fn emit(&self, decisions: &Decisions) {
        for (actuator, decision) in decisions {
            // The pump drives its own relay around the shutoff timer.
            if *actuator != ActuatorId::Pump {
                self.relays.set(*actuator, decision.active);
            }
            self.status.report_actuator_state(*actuator, decision);
        }
    }
}

fn gate_reason(config: &ActiveConfiguration) -> Option<&'static str> {
    match config.phase {
        GrowthPhase::Standby => Some("greenhouse in standby"),
        GrowthPhase::Harvest => Some("harvest phase"),
        _ if !config.system_enabled => Some("system disabled"),
        _ => None,
    }
}

fn off_decisions(reason: &str) -> Decisions {
    ActuatorId::ALL
        .iter()
        .map(|actuator| (*actuator, ActuatorDecision::off(reason)))
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeDelta, TimeZone, Utc};

    use greenhouse_common::{GreenhouseDocument, PhaseProfile, PresetBook};

    use super::*;
    use crate::{clock::testing::TestClock, relays::RelayBoard, sensors::SensorKind};

    struct Harness {
        cycle: Arc<ControlCycle>,
        store: Arc<GreenhouseStore>,
        engine: Arc<PhaseEngine>,
        sensors: Arc<SensorCache>,
        relays: Arc<RelayBoard>,
        status: Arc<StatusBoard>,
    }

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap()
    }

    fn lettuce() -> PresetBook {
        let mut presets = PresetBook::default();
        for (phase, days) in [
            (GrowthPhase::Germination, 2.0),
            (GrowthPhase::Growth, 10.0),
            (GrowthPhase::Flowering, 5.0),
        ] {
            presets.insert(
                "Lettuce",
                phase,
                PhaseProfile {
                    temperature_min: 18.0,
                    temperature_max: 26.0,
                    soil_moisture_min: 40.0,
                    soil_moisture_max: 70.0,
                    humidity_max: 85.0,
                    photoperiod_hours: Some(12.0),
                    required_days: Some(days),
                    ..PhaseProfile::default()
                },
            );
        }
        presets
    }

    fn harness(doc: Option<GreenhouseDocument>) -> Harness {
        let store = Arc::new(GreenhouseStore::in_memory("EG001", doc, lettuce()));
        let clock = Arc::new(TestClock::new(noon()));
        let reset = Arc::new(ResetSignal::new());
        let status = Arc::new(StatusBoard::new("EG001", None));
        let relays = Arc::new(RelayBoard::new());
        let sensors = Arc::new(SensorCache::new(Duration::from_secs(120)));
        let engine = PhaseEngine::new(store.clone(), clock.clone(), reset.clone(), status.clone());

        let cycle = ControlCycle::new(
            CycleDeps {
                store: store.clone(),
                engine: engine.clone(),
                sensors: sensors.clone(),
                relays: relays.clone(),
                status: status.clone(),
                reset,
                clock,
            },
            &ControllerConfig::default(),
            chrono_tz::UTC,
        );

        Harness {
            cycle: Arc::new(cycle),
            store,
            engine,
            sensors,
            relays,
            status,
        }
    }

    fn lettuce_in(phase: GrowthPhase, started: DateTime<Utc>) -> GreenhouseDocument {
        let mut doc = GreenhouseDocument::default();
        doc.start("Lettuce", phase, started);
        doc
    }

    fn decision(report: &TickReport, actuator: ActuatorId) -> ActuatorDecision {
        report
            .decisions
            .iter()
            .find(|(id, _)| *id == actuator)
            .map(|(_, decision)| decision.clone())
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn overdue_growth_advances_to_flowering_in_one_tick() {
        let started = noon() - TimeDelta::hours(10 * 24 + 12);
        let h = harness(Some(lettuce_in(GrowthPhase::Growth, started)));
        h.sensors.record(SensorKind::AirTemperature, 15.0).await;
        h.sensors.record(SensorKind::AirHumidity, 60.0).await;
        h.sensors.record(SensorKind::SoilMoisture, 55.0).await;

        let report = h.cycle.run_tick().await;

        assert_eq!(report.advanced_to, Some(GrowthPhase::Flowering));
        assert_eq!(report.phase, Some(GrowthPhase::Flowering));
        let doc = h.store.document().await.unwrap();
        assert_eq!(doc.phase, GrowthPhase::Flowering);
        assert_eq!(doc.phase_start, Some(noon()));
        assert!(doc.system_enabled);
        assert_eq!(
            h.engine.scheduled_at().await,
            Some(noon() + TimeDelta::days(5))
        );

        assert!(decision(&report, ActuatorId::Heater).active);
        assert_eq!(
            decision(&report, ActuatorId::Fan),
            ActuatorDecision::on("paired with heater")
        );
        assert!(decision(&report, ActuatorId::Lamp).active);
        assert_eq!(
            decision(&report, ActuatorId::Pump),
            ActuatorDecision::off("soil moisture adequate (55.0%)")
        );
        assert!(h.relays.is_on(ActuatorId::Heater));
        assert!(h.relays.is_on(ActuatorId::Fan));
        assert!(h.relays.is_on(ActuatorId::Lamp));
        assert!(!h.relays.is_on(ActuatorId::Pump));
    }

    #[tokio::test(start_paused = true)]
    async fn standby_gates_every_actuator_off() {
        let h = harness(Some(GreenhouseDocument::default()));
        h.sensors.record(SensorKind::SoilMoisture, 5.0).await;

        let report = h.cycle.run_tick().await;

        assert_eq!(report.decisions, off_decisions("greenhouse in standby"));
        assert!(!h.relays.is_on(ActuatorId::Pump));
        assert_eq!(
            h.status.actuator(ActuatorId::Pump),
            Some(ActuatorDecision::off("greenhouse in standby"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_system_gates_every_actuator_off() {
        let mut doc = lettuce_in(GrowthPhase::Growth, noon());
        doc.system_enabled = false;
        let h = harness(Some(doc));
        h.sensors.record(SensorKind::AirTemperature, 5.0).await;

        let report = h.cycle.run_tick().await;

        assert_eq!(report.decisions, off_decisions("system disabled"));
        assert!(!h.relays.is_on(ActuatorId::Heater));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_configuration_fails_safe() {
        let h = harness(None);

        let report = h.cycle.run_tick().await;

        assert_eq!(report.phase, None);
        assert_eq!(report.decisions, off_decisions("configuration unavailable"));
    }

    #[tokio::test(start_paused = true)]
    async fn tick_reports_sensor_averages_when_buffer_is_full() {
        let h = harness(Some(GreenhouseDocument::default()));
        for lux in [800.0, 900.0, 1000.0, 1100.0] {
            h.sensors.record(SensorKind::Light, lux).await;
        }
        h.sensors.record(SensorKind::SoilMoisture, 40.0).await;

        h.cycle.run_tick().await;
        assert_eq!(h.status.sensor_averages(), None);

        h.sensors.record(SensorKind::Light, 1200.0).await;
        h.cycle.run_tick().await;

        let reported = h.status.sensor_averages().unwrap();
        assert_eq!(reported.averages.light, Some(1000.0));
        assert_eq!(reported.averages.soil_moisture, Some(40.0));
        assert_eq!(reported.timestamp_epoch, noon().timestamp());
    }

    #[tokio::test(start_paused = true)]
    async fn missing_readings_turn_actuators_off() {
        let h = harness(Some(lettuce_in(GrowthPhase::Growth, noon())));

        let report = h.cycle.run_tick().await;

        let invalid = ActuatorDecision::fault(ControlError::InvalidReading);
        assert_eq!(decision(&report, ActuatorId::Heater), invalid);
        assert_eq!(decision(&report, ActuatorId::Fan), invalid);
        assert_eq!(decision(&report, ActuatorId::Pump), invalid);
    }

    #[tokio::test(start_paused = true)]
    async fn forced_flag_advances_one_phase() {
        let mut doc = lettuce_in(GrowthPhase::Germination, noon());
        doc.force_advance = true;
        let h = harness(Some(doc));

        let report = h.cycle.run_tick().await;

        assert_eq!(report.advanced_to, Some(GrowthPhase::Growth));
        let doc = h.store.document().await.unwrap();
        assert_eq!(doc.phase, GrowthPhase::Growth);
        assert!(!doc.force_advance);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_switches_everything_off() {
        let h = harness(Some(lettuce_in(GrowthPhase::Growth, noon())));
        h.sensors.record(SensorKind::AirTemperature, 10.0).await;
        h.sensors.record(SensorKind::SoilMoisture, 10.0).await;
        h.cycle.run_tick().await;
        assert!(h.relays.is_on(ActuatorId::Heater));
        assert!(h.relays.is_on(ActuatorId::Pump));

        h.cycle.all_off("controller shutting down").await;

        for actuator in ActuatorId::ALL {
            assert!(!h.relays.is_on(actuator), "{actuator} still on");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reset_signal_wakes_loop_before_next_poll() {
        let h = harness(Some(GreenhouseDocument::default()));
        let task = tokio::spawn(Arc::clone(&h.cycle).run());
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(
            h.status.actuator(ActuatorId::Heater),
            Some(ActuatorDecision::off("greenhouse in standby"))
        );

        h.engine.start("Lettuce", GrowthPhase::Growth).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(
            h.status.actuator(ActuatorId::Heater),
            Some(ActuatorDecision::fault(ControlError::InvalidReading))
        );
        task.abort();
    }
}
