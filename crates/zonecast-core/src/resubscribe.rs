// ── Resubscribe coordinator ──
//
// Turns transport status transitions into at most one channel rebuild per
// burst of reconnects: the rebuild is debounced, and a guard flag stops a
// second rebuild from starting while one is running.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, info};
use zonecast_api::TransportStatus;

use crate::scheduler::{OnceTask, Scheduler, TimerHandle};

/// What a status change means for the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusTransition {
    /// First time the transport reports connected.
    FirstConnect,
    /// Connected again after a previous connection was lost.
    Reconnect,
    /// Left the connected state.
    Lost,
    /// Anything else, including repeated reports of the same status.
    Unchanged,
}

#[derive(Default)]
struct CoordinatorState {
    last: Option<TransportStatus>,
    ever_connected: bool,
    timer: Option<TimerHandle>,
}

/// Debounced, non-overlapping trigger for `resubscribe_all_channels`.
pub struct ResubscribeCoordinator {
    debounce: Duration,
    state: Mutex<CoordinatorState>,
    running: AtomicBool,
    runs: AtomicU64,
}

impl ResubscribeCoordinator {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            state: Mutex::new(CoordinatorState::default()),
            running: AtomicBool::new(false),
            runs: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CoordinatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Classify `status` against the previous one and remember it.
    pub fn observe(&self, status: TransportStatus) -> StatusTransition {
        let mut state = self.lock();
        let previous = state.last.replace(status);
        let was_connected = previous.is_some_and(TransportStatus::is_connected);

        match (status.is_connected(), was_connected) {
            (true, true) => StatusTransition::Unchanged,
            (true, false) if state.ever_connected => StatusTransition::Reconnect,
            (true, false) => {
                state.ever_connected = true;
                StatusTransition::FirstConnect
            }
            (false, true) => StatusTransition::Lost,
            (false, false) => StatusTransition::Unchanged,
        }
    }

    /// (Re)start the debounce timer. A trigger inside the window replaces
    /// the pending one.
    pub fn trigger(&self, scheduler: &dyn Scheduler, rebuild: OnceTask) {
        let timer = scheduler.schedule_once(self.debounce, rebuild);
        let previous = self.lock().timer.replace(timer);
        if let Some(previous) = previous {
            previous.cancel();
            debug!(debounce_ms = self.debounce.as_millis(), "resubscribe debounce reset");
        }
    }

    /// Whether a rebuild is waiting on its debounce timer.
    pub fn is_scheduled(&self) -> bool {
        self.lock().timer.as_ref().is_some_and(|t| !t.is_cancelled())
    }

    /// Run `rebuild` unless another rebuild is in progress. Returns whether
    /// it ran.
    pub fn run_guarded(&self, rebuild: impl FnOnce()) -> bool {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("resubscribe already running, skipping");
            return false;
        }
        self.lock().timer = None;

        rebuild();

        let run = self.runs.fetch_add(1, Ordering::Relaxed) + 1;
        self.running.store(false, Ordering::Release);
        info!(run, "resubscribe complete");
        true
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Completed rebuilds since creation.
    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::Relaxed)
    }

    /// Cancel any pending rebuild and clear the guard. Idempotent.
    pub fn reset(&self) {
        if let Some(timer) = self.lock().timer.take() {
            timer.cancel();
        }
        self.running.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::scheduler::ManualScheduler;

    fn coordinator() -> Arc<ResubscribeCoordinator> {
        Arc::new(ResubscribeCoordinator::new(Duration::from_millis(500)))
    }

    fn rebuild_task(coordinator: &Arc<ResubscribeCoordinator>) -> OnceTask {
        let coordinator = Arc::clone(coordinator);
        Box::new(move || {
            coordinator.run_guarded(|| {});
        })
    }

    #[test]
    fn transitions_are_classified() {
        let c = coordinator();
        assert_eq!(c.observe(TransportStatus::Connecting), StatusTransition::Unchanged);
        assert_eq!(c.observe(TransportStatus::Connected), StatusTransition::FirstConnect);
        assert_eq!(c.observe(TransportStatus::Connected), StatusTransition::Unchanged);
        assert_eq!(c.observe(TransportStatus::Disconnected), StatusTransition::Lost);
        assert_eq!(c.observe(TransportStatus::Failed), StatusTransition::Unchanged);
        assert_eq!(c.observe(TransportStatus::Connected), StatusTransition::Reconnect);
    }

    #[test]
    fn rapid_triggers_rebuild_once() {
        let scheduler = ManualScheduler::new();
        let c = coordinator();

        c.trigger(&scheduler, rebuild_task(&c));
        scheduler.advance(Duration::from_millis(300));
        c.trigger(&scheduler, rebuild_task(&c));
        scheduler.advance(Duration::from_millis(300));
        assert_eq!(c.runs(), 0);

        scheduler.advance(Duration::from_millis(200));
        assert_eq!(c.runs(), 1);
        assert!(!c.is_scheduled());
    }

    #[test]
    fn guard_blocks_reentrant_rebuild() {
        let c = coordinator();
        let inner = Arc::clone(&c);
        let ran = c.run_guarded(|| {
            assert!(!inner.run_guarded(|| {}));
        });
        assert!(ran);
        assert_eq!(c.runs(), 1);
        assert!(!c.is_running());
    }

    #[test]
    fn reset_cancels_pending_rebuild() {
        let scheduler = ManualScheduler::new();
        let c = coordinator();
        c.trigger(&scheduler, rebuild_task(&c));
        c.reset();
        c.reset();

        scheduler.advance(Duration::from_secs(1));
        assert_eq!(c.runs(), 0);
    }
}
