use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use tokio::{sync::Notify, time::Instant};

/// Level-triggered "re-evaluate now" flag shared by every task that changes
/// greenhouse configuration. Writers only ever set it; the control loop is
/// the only reader and clears it when it wakes.
#[derive(Debug, Default)]
pub struct ResetSignal {
    pending: AtomicBool,
    notify: Notify,
}

impl ResetSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.pending.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    #[cfg(test)]
    pub fn is_set(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }

    /// Waits up to `timeout`. Returns `true` when woken by the signal, which
    /// is cleared before returning.
    pub async fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.pending.swap(false, Ordering::SeqCst) {
                return true;
            }
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    return self.pending.swap(false, Ordering::SeqCst);
                }
                // A permit left over from an already consumed set() only
                // loops back to the flag check.
                _ = self.notify.notified() => {}
            }
        }
    }
}
