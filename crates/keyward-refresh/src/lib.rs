//! Background token revalidation for keyward.
//!
//! A [`RefreshScheduler`] runs one recurring task per live session. The
//! task is bound to the session's [`Generation`]: every tick it hands a
//! [`RefreshTick`] carrying that generation to a callback, which decides
//! whether the loop keeps going.
//!
//! # Guarantees
//!
//! - At most one task is active per scheduler. [`RefreshScheduler::start`]
//!   cancels the previous task before installing the new one.
//! - Cancellation is synchronous: once [`RefreshHandle::cancel`] returns,
//!   the callback is never invoked again for that handle.
//!
//! # Integration
//!
//! ```ignore
//! scheduler.start(session.generation, move |tick| {
//!     let controller = controller.clone();
//!     async move {
//!         let verdict = controller.validator().validate().await;
//!         if verdict.generation != tick.generation {
//!             return TickFlow::Continue; // stale, belongs to another session
//!         }
//!         /* react to the verdict */
//!         TickFlow::Continue
//!     }
//! });
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use keyward_protocol::Generation;
use tokio::task::AbortHandle;
use tokio::time::{self, Instant as TokioInstant};
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for the refresh scheduler.
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Time between two revalidations. Default: 10 minutes.
    pub interval: Duration,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval: Self::DEFAULT_INTERVAL,
        }
    }
}

impl RefreshConfig {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10 * 60);

    /// Shortest interval accepted by [`validated`](Self::validated).
    pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

    pub fn with_interval(interval: Duration) -> Self {
        Self { interval }
    }

    /// Clamp out-of-range values so the config is safe to use.
    ///
    /// Called automatically by [`RefreshScheduler::new`]: `interval` is
    /// raised to at least [`Self::MIN_INTERVAL`].
    pub fn validated(mut self) -> Self {
        if self.interval < Self::MIN_INTERVAL {
            warn!(
                interval_ms = self.interval.as_millis() as u64,
                min_ms = Self::MIN_INTERVAL.as_millis() as u64,
                "refresh interval below minimum, clamping"
            );
            self.interval = Self::MIN_INTERVAL;
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Timer
// ---------------------------------------------------------------------------

/// Information about one tick, handed to the scheduler callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshTick {
    /// Tick number for this task (starts at 1).
    pub tick: u64,
    /// The session generation the task was started for.
    pub generation: Generation,
    /// How late the tick fired relative to its deadline.
    pub late_by: Duration,
}

/// Fixed-interval timer bound to one generation.
///
/// A late tick never triggers catch-up ticks: the next deadline is always
/// computed from the moment the tick actually fired.
#[derive(Debug)]
pub struct RefreshTimer {
    interval: Duration,
    generation: Generation,
    next: TokioInstant,
    ticks: u64,
}

impl RefreshTimer {
    pub fn new(config: &RefreshConfig, generation: Generation) -> Self {
        Self {
            interval: config.interval,
            generation,
            next: TokioInstant::now() + config.interval,
            ticks: 0,
        }
    }

    /// Waits until the next tick is due.
    pub async fn wait_for_tick(&mut self) -> RefreshTick {
        time::sleep_until(self.next).await;

        let now = TokioInstant::now();
        let late_by = now.saturating_duration_since(self.next);
        self.ticks += 1;
        self.next = now + self.interval;

        if late_by > self.interval / 10 {
            warn!(
                generation = %self.generation,
                tick = self.ticks,
                late_ms = late_by.as_millis() as u64,
                "refresh tick fired late"
            );
        }
        trace!(generation = %self.generation, tick = self.ticks, "refresh tick");

        RefreshTick {
            tick: self.ticks,
            generation: self.generation,
            late_by,
        }
    }

    pub fn tick_count(&self) -> u64 {
        self.ticks
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// What the callback wants the loop to do after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickFlow {
    Continue,
    Stop,
}

struct HandleInner {
    generation: Generation,
    cancelled: Arc<AtomicBool>,
    abort: AbortHandle,
}

/// Cancel handle of one refresh task. Cheap to clone.
#[derive(Clone)]
pub struct RefreshHandle {
    inner: Arc<HandleInner>,
}

impl RefreshHandle {
    pub fn generation(&self) -> Generation {
        self.inner.generation
    }

    /// Stops the task. No callback runs for this handle after this returns.
    ///
    /// Idempotent.
    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::SeqCst) {
            self.inner.abort.abort();
            debug!(generation = %self.inner.generation, "refresh task cancelled");
        }
    }

    /// `true` until the task is cancelled or stops on its own.
    pub fn is_active(&self) -> bool {
        !self.inner.cancelled.load(Ordering::SeqCst) && !self.inner.abort.is_finished()
    }
}

impl std::fmt::Debug for RefreshHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshHandle")
            .field("generation", &self.inner.generation)
            .field("active", &self.is_active())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Owns the single active refresh task.
pub struct RefreshScheduler {
    config: RefreshConfig,
    active: Mutex<Option<RefreshHandle>>,
}

impl RefreshScheduler {
    pub fn new(config: RefreshConfig) -> Self {
        Self {
            config: config.validated(),
            active: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &RefreshConfig {
        &self.config
    }

    /// Starts the recurring task for `generation`, cancelling any task
    /// still running for an earlier session.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start<F, Fut>(&self, generation: Generation, mut on_tick: F) -> RefreshHandle
    where
        F: FnMut(RefreshTick) -> Fut + Send + 'static,
        Fut: Future<Output = TickFlow> + Send + 'static,
    {
        let mut slot = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = slot.take() {
            previous.cancel();
        }

        let mut timer = RefreshTimer::new(&self.config, generation);
        let cancelled = Arc::new(AtomicBool::new(false));
        let task_cancelled = Arc::clone(&cancelled);

        let task = tokio::spawn(async move {
            loop {
                let tick = timer.wait_for_tick().await;
                if task_cancelled.load(Ordering::SeqCst) {
                    break;
                }
                if on_tick(tick).await == TickFlow::Stop {
                    debug!(
                        generation = %tick.generation,
                        tick = tick.tick,
                        "refresh task stopped"
                    );
                    break;
                }
            }
        });

        let inner = Arc::new(HandleInner {
            generation,
            cancelled,
            abort: task.abort_handle(),
        });
        let handle = RefreshHandle { inner };
        *slot = Some(handle.clone());

        debug!(
            generation = %generation,
            interval_secs = self.config.interval.as_secs(),
            "refresh task started"
        );
        handle
    }

    /// Cancels the active task, if any. Synchronous.
    pub fn cancel(&self) {
        let previous = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = previous {
            handle.cancel();
        }
    }

    /// Cancels the active task only if it belongs to `generation`.
    ///
    /// Returns `false` when the active task (if any) is for another
    /// session, which is then left running.
    pub fn cancel_generation(&self, generation: Generation) -> bool {
        let mut slot = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        match slot.as_ref() {
            Some(handle) if handle.generation() == generation => {
                handle.cancel();
                *slot = None;
                true
            }
            _ => false,
        }
    }

    /// The generation of the active task, if one is still running.
    pub fn active_generation(&self) -> Option<Generation> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .filter(|h| h.is_active())
            .map(RefreshHandle::generation)
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}
