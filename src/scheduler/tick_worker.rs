use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use super::dedicated::{Completion, Inner};

/// Handle to a periodic timer registered with
/// [`DedicatedScheduler::create_timer`](super::DedicatedScheduler::create_timer).
///
/// Dropping the handle unregisters the timer.
pub struct TickWorker {
    id: u64,
    scheduler: Weak<Inner>,
    enabled: Arc<AtomicBool>,
    interval: Duration,
}

impl TickWorker {
    pub(crate) fn new(
        id: u64,
        scheduler: Weak<Inner>,
        enabled: Arc<AtomicBool>,
        interval: Duration,
    ) -> Self {
        Self {
            id,
            scheduler,
            enabled,
            interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_active(&self) -> bool {
        self.scheduler.strong_count() > 0 && self.enabled.load(Ordering::Acquire)
    }

    /// Start firing. The first call comes one interval from now. Applied
    /// immediately on the worker, otherwise queued there.
    pub fn enable(&self) -> Completion<()> {
        self.set_enabled(true)
    }

    /// Stop firing. Disabling a disabled timer does nothing.
    pub fn disable(&self) -> Completion<()> {
        self.set_enabled(false)
    }

    fn set_enabled(&self, enabled: bool) -> Completion<()> {
        let Some(inner) = self.scheduler.upgrade() else {
            return Completion::closed();
        };
        let id = self.id;
        let flag = self.enabled.clone();
        let target = self.scheduler.clone();
        inner.invoke(move || {
            if let Some(inner) = target.upgrade() {
                inner.set_timer_enabled(id, &flag, enabled);
            }
        })
    }
}

impl Drop for TickWorker {
    fn drop(&mut self) {
        let Some(inner) = self.scheduler.upgrade() else {
            return;
        };
        let id = self.id;
        let target = self.scheduler.clone();
        drop(inner.invoke(move || {
            if let Some(inner) = target.upgrade() {
                inner.remove_timer(id);
            }
        }));
    }
}
