use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

use tracing::{debug, info};

use greenhouse_common::ActuatorId;

/// Actuator hardware collaborator. Fire-and-forget; implementations log
/// their own failures.
pub trait RelayBank: Send + Sync {
    fn set(&self, actuator: ActuatorId, on: bool);
}

/// Relay board that tracks the last commanded state of each actuator. GPIO
/// drivers hook in here; on the host it only logs transitions.
#[derive(Debug, Default)]
pub struct RelayBoard {
    states: Mutex<HashMap<ActuatorId, bool>>,
    writes: Mutex<u64>,
}

impl RelayBoard {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn is_on(&self, actuator: ActuatorId) -> bool {
        lock(&self.states).get(&actuator).copied().unwrap_or(false)
    }

    #[cfg(test)]
    pub fn writes(&self) -> u64 {
        *lock(&self.writes)
    }
}

impl RelayBank for RelayBoard {
    fn set(&self, actuator: ActuatorId, on: bool) {
        *lock(&self.writes) += 1;
        let previous = lock(&self.states).insert(actuator, on);
        if previous != Some(on) {
            info!(%actuator, on, "relay switched");
        } else {
            debug!(%actuator, on, "relay unchanged");
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
