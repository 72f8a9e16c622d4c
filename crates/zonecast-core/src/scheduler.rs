// ── Timers ──
//
// Every delay the runtime needs (debounce, pending retry, poll loop) goes
// through `Scheduler`, so tests and the replay tool can drive time by hand.
// Timer handles are cancellation tokens; dropping a handle cancels it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::CoreError;

pub type OnceTask = Box<dyn FnOnce() + Send>;
pub type RepeatingTask = Arc<dyn Fn() + Send + Sync>;

/// Cancellable handle for a scheduled task.
#[derive(Debug)]
pub struct TimerHandle {
    token: CancellationToken,
}

impl TimerHandle {
    fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Source of one-shot and repeating timers.
pub trait Scheduler: Send + Sync {
    fn schedule_once(&self, delay: Duration, task: OnceTask) -> TimerHandle;

    /// Run `task` every `period`, first after one period.
    fn schedule_repeating(&self, period: Duration, task: RepeatingTask) -> TimerHandle;
}

// ── TokioScheduler ──────────────────────────────────────────────────

/// Scheduler backed by `tokio::time` on a runtime handle.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    handle: Handle,
}

impl TokioScheduler {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Use the runtime the caller is running on.
    pub fn current() -> Result<Self, CoreError> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| CoreError::NoAsyncRuntime(e.to_string()))
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_once(&self, delay: Duration, task: OnceTask) -> TimerHandle {
        let token = CancellationToken::new();
        let cancel = token.clone();
        self.handle.spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(delay) => task(),
            }
        });
        TimerHandle::new(token)
    }

    fn schedule_repeating(&self, period: Duration, task: RepeatingTask) -> TimerHandle {
        let token = CancellationToken::new();
        let cancel = token.clone();
        let period = period.max(Duration::from_millis(1));
        self.handle.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => task(),
                }
            }
        });
        TimerHandle::new(token)
    }
}

// ── ManualScheduler ─────────────────────────────────────────────────

enum ManualAction {
    Once(Option<OnceTask>),
    Repeating(RepeatingTask),
}

struct ManualTimer {
    seq: u64,
    due: Duration,
    period: Option<Duration>,
    token: CancellationToken,
    action: ManualAction,
}

#[derive(Default)]
struct ManualState {
    now: Duration,
    next_seq: u64,
    timers: Vec<ManualTimer>,
}

/// Virtual-clock scheduler. Nothing runs until [`advance`](Self::advance)
/// moves the clock past a timer's due time.
#[derive(Clone, Default)]
pub struct ManualScheduler {
    state: Arc<Mutex<ManualState>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Time elapsed on the virtual clock.
    pub fn now(&self) -> Duration {
        self.lock().now
    }

    /// Timers that are scheduled and not cancelled.
    pub fn pending_timers(&self) -> usize {
        self.lock()
            .timers
            .iter()
            .filter(|t| !t.token.is_cancelled())
            .count()
    }

    /// Move the clock forward by `by`, running every timer that falls due,
    /// in due-time order. Tasks run without the scheduler lock held and may
    /// schedule further timers; those run too if they fall inside the
    /// window. Returns the number of tasks run.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.now() + by;
        let mut ran = 0;

        loop {
            let next = {
                let mut state = self.lock();
                state.timers.retain(|t| !t.token.is_cancelled());
                let Some(index) = state
                    .timers
                    .iter()
                    .enumerate()
                    .filter(|(_, t)| t.due <= target)
                    .min_by_key(|(_, t)| (t.due, t.seq))
                    .map(|(i, _)| i)
                else {
                    state.now = target;
                    break;
                };

                let mut timer = state.timers.swap_remove(index);
                state.now = timer.due;
                match (&mut timer.action, timer.period) {
                    (ManualAction::Repeating(task), Some(period)) => {
                        let task = Arc::clone(task);
                        let seq = state.next_seq;
                        state.next_seq += 1;
                        state.timers.push(ManualTimer {
                            seq,
                            due: timer.due + period,
                            period: Some(period),
                            token: timer.token.clone(),
                            action: ManualAction::Repeating(Arc::clone(&task)),
                        });
                        Some(Task::Repeating(task))
                    }
                    (ManualAction::Once(task), _) => task.take().map(Task::Once),
                    (ManualAction::Repeating(_), None) => None,
                }
            };

            if let Some(task) = next {
                trace!(at_ms = self.now().as_millis(), "manual timer fired");
                match task {
                    Task::Once(task) => task(),
                    Task::Repeating(task) => task(),
                }
                ran += 1;
            }
        }
        ran
    }

    fn push(&self, delay: Duration, period: Option<Duration>, action: ManualAction) -> TimerHandle {
        let token = CancellationToken::new();
        let mut state = self.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        let due = state.now + delay;
        state.timers.push(ManualTimer {
            seq,
            due,
            period,
            token: token.clone(),
            action,
        });
        TimerHandle::new(token)
    }
}

enum Task {
    Once(OnceTask),
    Repeating(RepeatingTask),
}

impl Scheduler for ManualScheduler {
    fn schedule_once(&self, delay: Duration, task: OnceTask) -> TimerHandle {
        self.push(delay, None, ManualAction::Once(Some(task)))
    }

    fn schedule_repeating(&self, period: Duration, task: RepeatingTask) -> TimerHandle {
        let period = period.max(Duration::from_millis(1));
        self.push(period, Some(period), ManualAction::Repeating(task))
    }
}
