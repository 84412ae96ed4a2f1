use std::{sync::Arc, time::Duration};

use tokio::{sync::Mutex, task::JoinHandle, time::Instant};
use tracing::{debug, info};

use greenhouse_common::{
    pump_plan, ActiveConfiguration, ActuatorDecision, ActuatorId, PumpCalibration, PumpPlan,
};

use crate::relays::RelayBank;

#[derive(Debug, Default)]
struct PumpRuntimeState {
    last_activation: Option<Instant>,
    is_irrigating: bool,
    pending_shutoff: Option<JoinHandle<()>>,
    generation: u64,
}

/// Irrigation pump. A pulse runs for a computed duration and switches itself
/// off; `turn_off` cancels the pending shutoff so a stale timer can never
/// cut a later pulse.
pub struct Pump {
    relays: Arc<dyn RelayBank>,
    calibration: PumpCalibration,
    state: Arc<Mutex<PumpRuntimeState>>,
}

impl Pump {
    pub fn new(relays: Arc<dyn RelayBank>, calibration: PumpCalibration) -> Self {
        Self {
            relays,
            calibration,
            state: Arc::new(Mutex::new(PumpRuntimeState::default())),
        }
    }

    /// Decides and applies one tick's irrigation in a single critical
    /// section so the decision sees the pulse state it acts on.
    pub async fn control(
        &self,
        soil_moisture: Option<f32>,
        config: &ActiveConfiguration,
    ) -> ActuatorDecision {
        let mut state = self.state.lock().await;
        let since_last_pulse = state.last_activation.map(|at| at.elapsed());
        let plan = pump_plan(soil_moisture, config, since_last_pulse, &self.calibration);

        match &plan {
            PumpPlan::Irrigate { duration, .. } => self.start_pulse(&mut state, *duration),
            PumpPlan::Stop { .. } => self.stop(&mut state),
        }
        plan.decision()
    }

    #[cfg(test)]
    pub async fn turn_on(&self, duration: Duration) {
        let mut state = self.state.lock().await;
        self.start_pulse(&mut state, duration);
    }

    pub async fn turn_off(&self) {
        let mut state = self.state.lock().await;
        self.stop(&mut state);
    }

    #[cfg(test)]
    pub async fn is_irrigating(&self) -> bool {
        self.state.lock().await.is_irrigating
    }

    fn start_pulse(&self, state: &mut PumpRuntimeState, duration: Duration) {
        if state.is_irrigating {
            debug!("pump already irrigating");
            return;
        }

        state.generation += 1;
        let generation = state.generation;
        self.relays.set(ActuatorId::Pump, true);
        state.is_irrigating = true;
        state.last_activation = Some(Instant::now());
        info!("irrigation pulse started for {:.2}s", duration.as_secs_f64());

        let shared = Arc::clone(&self.state);
        let relays = Arc::clone(&self.relays);
        state.pending_shutoff = Some(tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let mut state = shared.lock().await;
            if state.generation != generation || !state.is_irrigating {
                return;
            }
            relays.set(ActuatorId::Pump, false);
            state.is_irrigating = false;
            state.pending_shutoff = None;
            info!("irrigation pulse finished");
        }));
    }

    fn stop(&self, state: &mut PumpRuntimeState) {
        if let Some(shutoff) = state.pending_shutoff.take() {
            shutoff.abort();
        }
        if state.is_irrigating {
            info!("irrigation pulse stopped early");
        }
        state.is_irrigating = false;
        self.relays.set(ActuatorId::Pump, false);
    }
}
