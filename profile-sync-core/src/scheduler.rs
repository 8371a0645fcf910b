//! Injectable timer abstraction.
//!
//! Every deferred action in the workspace (throttle cool-downs, debounce and
//! batch windows, retry backoff, connectivity probes, popup liveness polls)
//! goes through a [`Scheduler`]. Production code uses [`TokioScheduler`];
//! tests drive a [`ManualScheduler`] whose clock only moves on `advance`.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tokio::time::Instant;

pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

/// Identifies a scheduled callback for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

impl TimerHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

pub trait Scheduler: Send + Sync {
    /// Run `callback` once after `delay`.
    fn after(&self, delay: Duration, callback: TimerCallback) -> TimerHandle;

    /// Cancel a pending callback. Returns `false` if it already ran or was
    /// cancelled before.
    fn cancel(&self, handle: TimerHandle) -> bool;

    /// Monotonic milliseconds since the scheduler was created.
    fn now_millis(&self) -> u64;
}

// ---------------------------------------------------------------------------
// Tokio
// ---------------------------------------------------------------------------

/// Scheduler backed by `tokio::time::sleep` on a runtime handle.
pub struct TokioScheduler {
    runtime: Handle,
    started: Instant,
    next_id: AtomicU64,
    tasks: Arc<Mutex<HashMap<u64, AbortHandle>>>,
}

impl TokioScheduler {
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            started: Instant::now(),
            next_id: AtomicU64::new(1),
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Scheduler on the runtime of the calling task, if there is one.
    pub fn try_current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }

    pub fn pending(&self) -> usize {
        self.tasks.lock().len()
    }
}

impl Scheduler for TokioScheduler {
    fn after(&self, delay: Duration, callback: TimerCallback) -> TimerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let tasks = self.tasks.clone();
        // Hold the map lock across spawn so a zero-delay task cannot remove
        // its entry before it is inserted.
        let mut guard = self.tasks.lock();
        let join = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if tasks.lock().remove(&id).is_some() {
                callback();
            }
        });
        guard.insert(id, join.abort_handle());
        TimerHandle(id)
    }

    fn cancel(&self, handle: TimerHandle) -> bool {
        match self.tasks.lock().remove(&handle.0) {
            Some(abort) => {
                abort.abort();
                true
            }
            None => false,
        }
    }

    fn now_millis(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        for (_, abort) in self.tasks.lock().drain() {
            abort.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Manual (virtual clock)
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ManualState {
    now: u64,
    next_id: u64,
    timers: BTreeMap<(u64, u64), TimerCallback>,
    due_by_id: HashMap<u64, u64>,
}

/// Deterministic scheduler: callbacks run only inside [`ManualScheduler::advance`],
/// in due-time order (ties in scheduling order), with the clock set to each
/// callback's due time while it runs.
#[derive(Default)]
pub struct ManualScheduler {
    state: Mutex<ManualState>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward by `by`, running every callback that falls due,
    /// including callbacks scheduled by callbacks within the window.
    pub fn advance(&self, by: Duration) {
        let target = {
            let state = self.state.lock();
            state.now.saturating_add(by.as_millis() as u64)
        };
        while let Some(callback) = self.pop_due(target) {
            callback();
        }
        let mut state = self.state.lock();
        state.now = state.now.max(target);
    }

    /// Run callbacks already due at the current instant.
    pub fn run_due(&self) {
        self.advance(Duration::ZERO);
    }

    pub fn pending(&self) -> usize {
        self.state.lock().timers.len()
    }

    fn pop_due(&self, target: u64) -> Option<TimerCallback> {
        let mut state = self.state.lock();
        let (&(due, id), _) = state.timers.iter().next()?;
        if due > target {
            return None;
        }
        let callback = state.timers.remove(&(due, id))?;
        state.due_by_id.remove(&id);
        state.now = due;
        Some(callback)
    }
}

impl Scheduler for ManualScheduler {
    fn after(&self, delay: Duration, callback: TimerCallback) -> TimerHandle {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = state.next_id;
        let due = state.now.saturating_add(delay.as_millis() as u64);
        state.timers.insert((due, id), callback);
        state.due_by_id.insert(id, due);
        TimerHandle(id)
    }

    fn cancel(&self, handle: TimerHandle) -> bool {
        let mut state = self.state.lock();
        match state.due_by_id.remove(&handle.0) {
            Some(due) => state.timers.remove(&(due, handle.0)).is_some(),
            None => false,
        }
    }

    fn now_millis(&self) -> u64 {
        self.state.lock().now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, impl Fn(&'static str) -> TimerCallback) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_for_cb = log.clone();
        let make = move |label: &'static str| -> TimerCallback {
            let log = log_for_cb.clone();
            Box::new(move || log.lock().push(label))
        };
        (log, make)
    }

    #[test]
    fn manual_runs_in_due_order_and_respects_cancel() {
        let scheduler = ManualScheduler::new();
        let (log, make) = recorder();
        scheduler.after(Duration::from_millis(30), make("c"));
        let b = scheduler.after(Duration::from_millis(20), make("b"));
        scheduler.after(Duration::from_millis(10), make("a"));
        assert!(scheduler.cancel(b));
        assert!(!scheduler.cancel(b));

        scheduler.advance(Duration::from_millis(15));
        assert_eq!(*log.lock(), vec!["a"]);
        assert_eq!(scheduler.now_millis(), 15);

        scheduler.advance(Duration::from_millis(100));
        assert_eq!(*log.lock(), vec!["a", "c"]);
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn manual_runs_nested_timers_inside_window() {
        let scheduler = Arc::new(ManualScheduler::new());
        let fired = Arc::new(AtomicUsize::new(0));

        let inner_scheduler = scheduler.clone();
        let inner_fired = fired.clone();
        scheduler.after(
            Duration::from_millis(10),
            Box::new(move || {
                inner_fired.fetch_add(1, Ordering::SeqCst);
                let fired = inner_fired.clone();
                inner_scheduler.after(
                    Duration::from_millis(10),
                    Box::new(move || {
                        fired.fetch_add(1, Ordering::SeqCst);
                    }),
                );
            }),
        );

        scheduler.advance(Duration::from_millis(25));
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn tokio_scheduler_fires_and_cancels() {
        let scheduler = TokioScheduler::try_current().expect("inside runtime");
        let (log, make) = recorder();
        scheduler.after(Duration::from_millis(50), make("kept"));
        let dropped = scheduler.after(Duration::from_millis(50), make("dropped"));
        assert!(scheduler.cancel(dropped));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(*log.lock(), vec!["kept"]);
        assert_eq!(scheduler.pending(), 0);
        assert!(scheduler.now_millis() >= 50);
    }
}
