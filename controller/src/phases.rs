use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, info, warn};

use greenhouse_common::{
    due_transition, next_deadline, ActiveConfiguration, ControlError, GrowthPhase, ResolveError,
};

use crate::{
    clock::Clock,
    signal::ResetSignal,
    status::StatusBoard,
    store::{GreenhouseStore, StoreError},
};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Control(#[from] ControlError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

struct ScheduledAdvance {
    fire_at: DateTime<Utc>,
    cancelled: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl ScheduledAdvance {
    fn cancel(self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.handle.abort();
    }
}

/// Owns every phase write. Polled, scheduled and forced transitions, cycle
/// starts and restarts all run under the `scheduled` lock, which also holds
/// the single pending deadline timer. A timer cancelled after it woke finds
/// its flag set once it gets the lock and does nothing.
pub struct PhaseEngine {
    store: Arc<GreenhouseStore>,
    clock: Arc<dyn Clock>,
    reset: Arc<ResetSignal>,
    status: Arc<StatusBoard>,
    scheduled: Mutex<Option<ScheduledAdvance>>,
}

impl PhaseEngine {
    pub fn new(
        store: Arc<GreenhouseStore>,
        clock: Arc<dyn Clock>,
        reset: Arc<ResetSignal>,
        status: Arc<StatusBoard>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            clock,
            reset,
            status,
            scheduled: Mutex::new(None),
        })
    }

    pub async fn scheduled_at(&self) -> Option<DateTime<Utc>> {
        self.scheduled.lock().await.as_ref().map(|job| job.fire_at)
    }

    /// Polled advancement. `config` only gates the attempt; the decision is
    /// re-made against the stored document under the lock, so a config that
    /// is stale because another task already advanced changes nothing.
    pub async fn verify_and_advance(
        self: &Arc<Self>,
        config: &ActiveConfiguration,
    ) -> Result<Option<GrowthPhase>, EngineError> {
        let now = self.clock.now();
        if due_transition(config, now).is_none() {
            return Ok(None);
        }

        let mut slot = self.scheduled.lock().await;
        let Some(phase) = self.advance_if_due(now).await? else {
            debug!("phase already advanced elsewhere");
            return Ok(None);
        };
        info!(%phase, "required days elapsed, phase advanced");
        self.after_transition(&mut slot, phase, Some(now)).await;
        Ok(Some(phase))
    }

    /// (Re)arms the deadline timer for the stored phase, cancelling any
    /// pending one first. Nothing is armed for paused phases, missing
    /// durations or deadlines already in the past.
    pub async fn schedule_advance(
        self: &Arc<Self>,
    ) -> Result<Option<DateTime<Utc>>, EngineError> {
        let mut slot = self.scheduled.lock().await;
        self.arm(&mut slot).await
    }

    pub async fn force_advance(self: &Arc<Self>) -> Result<GrowthPhase, EngineError> {
        let mut slot = self.scheduled.lock().await;
        let now = self.clock.now();
        let (from, to) = self
            .store
            .update(|doc| {
                let from = doc.phase;
                let to = from.next().ok_or(ControlError::NoNextPhase(from))?;
                doc.enter_phase(to, now);
                Ok::<_, EngineError>((from, to))
            })
            .await?;

        info!(%from, %to, "phase advanced on request");
        self.after_transition(&mut slot, to, Some(now)).await;
        Ok(to)
    }

    pub async fn start(
        self: &Arc<Self>,
        plant: &str,
        phase: GrowthPhase,
    ) -> Result<(), EngineError> {
        let plant = plant.trim();
        if plant.is_empty() {
            return Err(EngineError::InvalidRequest("plant is required".to_string()));
        }
        if phase == GrowthPhase::Standby {
            return Err(EngineError::InvalidRequest(
                "a cycle cannot start in standby".to_string(),
            ));
        }
        if self.store.get_profile(plant, phase).is_none() {
            return Err(ResolveError::PresetNotFound {
                plant: plant.to_string(),
                phase,
            }
            .into());
        }

        let mut slot = self.scheduled.lock().await;
        let now = self.clock.now();
        self.store
            .update(|doc| {
                doc.start(plant, phase, now);
                Ok::<_, StoreError>(())
            })
            .await?;

        info!(plant, %phase, "growth cycle started");
        self.after_transition(&mut slot, phase, Some(now)).await;
        Ok(())
    }

    pub async fn restart(self: &Arc<Self>) -> Result<(), EngineError> {
        let mut slot = self.scheduled.lock().await;
        self.store
            .update(|doc| {
                doc.reset_to_standby();
                Ok::<_, StoreError>(())
            })
            .await?;

        info!("greenhouse returned to standby");
        self.after_transition(&mut slot, GrowthPhase::Standby, None).await;
        Ok(())
    }

    async fn advance_if_due(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Option<GrowthPhase>, EngineError> {
        let config = self.store.resolve().await?;
        let Some(next) = due_transition(&config, now) else {
            return Ok(None);
        };
        self.store
            .update(|doc| {
                doc.enter_phase(next, now);
                Ok::<_, StoreError>(())
            })
            .await?;
        Ok(Some(next))
    }

    async fn after_transition(
        self: &Arc<Self>,
        slot: &mut Option<ScheduledAdvance>,
        phase: GrowthPhase,
        phase_start: Option<DateTime<Utc>>,
    ) {
        self.status.report_phase(phase, phase_start);
        self.reset.set();
        if let Err(err) = self.arm(slot).await {
            warn!("failed to schedule next phase advance: {err}");
        }
    }

    async fn arm(
        self: &Arc<Self>,
        slot: &mut Option<ScheduledAdvance>,
    ) -> Result<Option<DateTime<Utc>>, EngineError> {
        if let Some(previous) = slot.take() {
            debug!(fire_at = %previous.fire_at, "cancelled pending phase advance");
            previous.cancel();
        }

        let config = self.store.resolve().await?;
        let Some(fire_at) = next_deadline(&config) else {
            debug!(phase = %config.phase, "no phase advance to schedule");
            return Ok(None);
        };

        let now = self.clock.now();
        if fire_at <= now {
            info!(phase = %config.phase, "phase deadline already passed");
            return Ok(None);
        }

        let delay = (fire_at - now).to_std().unwrap_or_default();
        let cancelled = Arc::new(AtomicBool::new(false));
        let handle = tokio::spawn(Arc::clone(self).fire(Arc::clone(&cancelled), delay));
        info!(phase = %config.phase, %fire_at, "phase advance scheduled");

        *slot = Some(ScheduledAdvance {
            fire_at,
            cancelled,
            handle,
        });
        Ok(Some(fire_at))
    }

    fn fire(
        self: Arc<Self>,
        cancelled: Arc<AtomicBool>,
        delay: Duration,
    ) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move {
            tokio::time::sleep(delay).await;

            let mut slot = self.scheduled.lock().await;
            if cancelled.load(Ordering::SeqCst) {
                debug!("{}", ControlError::SchedulingRace);
                return;
            }
            // Still the armed job: release the slot without aborting this task.
            *slot = None;

            let now = self.clock.now();
            match self.advance_if_due(now).await {
                Ok(Some(phase)) => {
                    info!(%phase, "scheduled phase advance");
                    self.after_transition(&mut slot, phase, Some(now)).await;
                }
                Ok(None) => {
                    if let Err(err) = self.arm(&mut slot).await {
                        warn!("failed to re-arm phase advance: {err}");
                    }
                }
                Err(err) => warn!("scheduled phase advance failed: {err}"),
            }
        })
    }
}
