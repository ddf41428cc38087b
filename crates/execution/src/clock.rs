//! Clock and timer seams for the recompute controller.
//!
//! Production code uses [`SystemClock`] and [`TokioTimer`]. Tests run on a
//! paused tokio runtime, where `tokio::time::Instant` and sleeps are
//! deterministic, and pin the wall clock with [`FixedClock`].

use std::sync::Mutex;
use std::time::Duration;

use chrono::NaiveDateTime;
use tokio::runtime::Handle;
use tokio::time::Instant;

/// Source of time.
pub trait Clock: Send + Sync {
    /// Local wall-clock time; its date is "today" for the scheduler.
    fn now(&self) -> NaiveDateTime;

    /// Monotonic instant used for cooldown bookkeeping.
    fn instant(&self) -> Instant;
}

/// The machine's local clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }

    fn instant(&self) -> Instant {
        Instant::now()
    }
}

/// A wall clock pinned to a settable timestamp.
#[derive(Debug)]
pub struct FixedClock {
    wall: Mutex<NaiveDateTime>,
}

impl FixedClock {
    /// Pin the wall clock at `now`.
    pub fn new(now: NaiveDateTime) -> Self {
        Self {
            wall: Mutex::new(now),
        }
    }

    /// Move the wall clock.
    pub fn set(&self, now: NaiveDateTime) {
        *self.wall.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        *self.wall.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn instant(&self) -> Instant {
        Instant::now()
    }
}

/// Work executed when a timer expires.
pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

/// One-shot timers.
///
/// Implementations must never invoke the callback from inside `start`:
/// callers may hold locks while arming a timer.
pub trait Timer: Send + Sync {
    /// Run `callback` once after `delay`, unless the handle is cancelled.
    fn start(&self, delay: Duration, callback: TimerCallback) -> TimerHandle;
}

/// Cancellation handle for an armed timer. Dropping it leaves the timer armed.
pub struct TimerHandle {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl TimerHandle {
    /// Wrap a cancellation action.
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Disarm the timer.
    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerHandle")
            .field("armed", &self.cancel.is_some())
            .finish()
    }
}

/// Timers backed by `tokio::time::sleep` on a runtime handle.
#[derive(Debug, Clone)]
pub struct TokioTimer {
    runtime: Handle,
}

impl TokioTimer {
    /// Timers spawned onto the given runtime.
    pub fn new(runtime: Handle) -> Self {
        Self { runtime }
    }

    /// Timers spawned onto the current runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }
}

impl Timer for TokioTimer {
    fn start(&self, delay: Duration, callback: TimerCallback) -> TimerHandle {
        let task = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            callback();
        });
        TimerHandle::new(move || task.abort())
    }
}
