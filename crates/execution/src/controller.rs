//! Recompute controller - decides when the completion scheduler runs.
//!
//! ```text
//!            change                 timer fires
//!   Idle ───────────────▶ TimerPending ─────────▶ Running ──▶ Idle
//!     │                     │   ▲  change           ▲           │
//!     │  compute now        │   └──(restart)        │           │ follow-up recorded
//!     └─────────────────────┴───────────────────────┘           ▼
//!                                                          TimerPending
//! ```
//!
//! Changes are debounced and held back until the cooldown after a run has
//! elapsed. The planner's own writes are ignored. A run whose inputs match
//! the previous run's signature is skipped unless it was forced; a forced
//! request that arrives mid-run keeps its force in the follow-up.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use lineplan_core::{
    BatchComplete, CapacitySnapshot, ChangeNotification, CoreError, ItemField, PlannerConfig,
    RecomputeConfig, RunId, WorkItem,
};
use lineplan_progress::{
    CapacityEstimator, CapacitySource, StatisticsProvider, StoreStatistics, WorkCalendar,
};
use lineplan_storage::{Storage, StorageError};
use tokio::runtime::Handle;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, field, info, info_span, trace, warn, Instrument, Span};

use crate::clock::{Clock, SystemClock, Timer, TimerHandle, TokioTimer};
use crate::scheduler::{CompletionScheduler, Schedule};
use crate::signature::RunSignature;

/// Capacity of the batch-complete channel.
const BATCH_BUFFER: usize = 64;

/// Errors that end a recompute run early.
#[derive(Debug, thiserror::Error)]
pub enum RecomputeError {
    /// Reading items or statistics, or writing predictions, failed
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The run panicked
    #[error("run panicked: {0}")]
    Panicked(String),

    /// The run's task was cancelled by runtime shutdown
    #[error("run was aborted")]
    Aborted,
}

/// Observable controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerPhase {
    /// Waiting for changes
    Idle,
    /// A debounce timer is armed
    TimerPending,
    /// The scheduler is running
    Running,
}

/// What a change notification did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// A debounce timer was armed
    Scheduled,
    /// The pending debounce timer was restarted
    Restarted,
    /// A run is in progress; a follow-up run was recorded
    Deferred,
    /// Inside the cooldown after the last run; the timer was armed to fire
    /// once the cooldown has elapsed
    CoolingDown,
    /// Ignored: the planner's own write
    Suppressed,
}

/// Details of a run that allocated and wrote predictions.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Run identifier
    pub run_id: RunId,
    /// Input fingerprint
    pub signature: RunSignature,
    /// Capacity used
    pub capacity: CapacitySnapshot,
    /// Where the daily capacity came from (None = unavailable)
    pub capacity_source: Option<CapacitySource>,
    /// Per-item results
    pub schedule: Schedule,
    /// Items whose stored prediction changed
    pub items_written: usize,
    /// Wall time spent
    pub elapsed: Duration,
}

/// Result of asking for a run.
#[derive(Debug)]
pub enum RunOutcome {
    /// Predictions were recomputed and written
    Completed(RunReport),
    /// Inputs matched the previous run; nothing was allocated
    Skipped(RunSignature),
    /// Another run was in progress; a follow-up run was recorded instead
    Coalesced,
    /// The run failed; the controller is back to idle
    Failed(RecomputeError),
}

/// Snapshot of the controller's bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct RecomputeStatus {
    /// Current phase
    pub phase: ControllerPhase,
    /// Signature of the last completed run
    pub last_signature: Option<RunSignature>,
    /// When the last run of any kind finished
    pub last_run: Option<Instant>,
    /// Input signature of the last failed run, if it got that far
    pub last_failure: Option<RunSignature>,
    /// Runs that wrote predictions
    pub runs_completed: u64,
    /// Runs skipped by memoization
    pub runs_skipped: u64,
    /// Runs that failed
    pub runs_failed: u64,
}

/// Run requested while another one was in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum FollowUp {
    Debounced,
    Forced,
}

enum Phase {
    Idle,
    TimerPending {
        generation: u64,
        handle: TimerHandle,
        force: bool,
    },
    Running { follow_up: Option<FollowUp> },
}

impl Phase {
    fn kind(&self) -> ControllerPhase {
        match self {
            Phase::Idle => ControllerPhase::Idle,
            Phase::TimerPending { .. } => ControllerPhase::TimerPending,
            Phase::Running { .. } => ControllerPhase::Running,
        }
    }
}

struct Gate {
    phase: Phase,
    generation: u64,
    /// Input signature of the run in progress, once computed
    run_signature: Option<RunSignature>,
    last_signature: Option<RunSignature>,
    last_run: Option<Instant>,
    last_failure: Option<RunSignature>,
    runs_completed: u64,
    runs_skipped: u64,
    runs_failed: u64,
}

struct Inner {
    storage: Arc<dyn Storage>,
    statistics: Arc<dyn StatisticsProvider>,
    scheduler: CompletionScheduler,
    estimator: CapacityEstimator,
    config: RecomputeConfig,
    date_format: String,
    clock: Arc<dyn Clock>,
    timer: Arc<dyn Timer>,
    runtime: Handle,
    in_flight: AtomicBool,
    suppressing: AtomicBool,
    gate: Mutex<Gate>,
    batches: broadcast::Sender<BatchComplete>,
}

impl Inner {
    fn lock_gate(&self) -> MutexGuard<'_, Gate> {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

enum RunBody {
    Completed(RunReport),
    Skipped(RunSignature),
}

/// Builder for [`RecomputeController`].
pub struct RecomputeControllerBuilder {
    storage: Arc<dyn Storage>,
    config: PlannerConfig,
    clock: Option<Arc<dyn Clock>>,
    timer: Option<Arc<dyn Timer>>,
    statistics: Option<Arc<dyn StatisticsProvider>>,
    runtime: Option<Handle>,
}

impl RecomputeControllerBuilder {
    /// Use a specific clock (default: [`SystemClock`]).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Use a specific timer (default: [`TokioTimer`] on the runtime).
    pub fn with_timer(mut self, timer: Arc<dyn Timer>) -> Self {
        self.timer = Some(timer);
        self
    }

    /// Use a specific statistics source (default: the item store).
    pub fn with_statistics(mut self, statistics: Arc<dyn StatisticsProvider>) -> Self {
        self.statistics = Some(statistics);
        self
    }

    /// Spawn runs on this runtime (default: the current one).
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Build the controller.
    ///
    /// # Panics
    ///
    /// Panics when no runtime was given and this is called outside a tokio
    /// runtime.
    pub fn build(self) -> RecomputeController {
        let runtime = self.runtime.unwrap_or_else(Handle::current);
        let calendar = WorkCalendar::from_config(&self.config.calendar);
        let estimator = CapacityEstimator::new(&self.config.capacity, &calendar);
        let scheduler = CompletionScheduler::new(calendar, &self.config.scheduler);
        let statistics: Arc<dyn StatisticsProvider> = match self.statistics {
            Some(statistics) => statistics,
            None => Arc::new(StoreStatistics::new(self.storage.clone())),
        };
        let timer: Arc<dyn Timer> = match self.timer {
            Some(timer) => timer,
            None => Arc::new(TokioTimer::new(runtime.clone())),
        };
        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };
        let (batches, _) = broadcast::channel(BATCH_BUFFER);

        RecomputeController {
            inner: Arc::new(Inner {
                storage: self.storage,
                statistics,
                scheduler,
                estimator,
                config: self.config.recompute,
                date_format: self.config.output.date_format,
                clock,
                timer,
                runtime,
                in_flight: AtomicBool::new(false),
                suppressing: AtomicBool::new(false),
                gate: Mutex::new(Gate {
                    phase: Phase::Idle,
                    generation: 0,
                    run_signature: None,
                    last_signature: None,
                    last_run: None,
                    last_failure: None,
                    runs_completed: 0,
                    runs_skipped: 0,
                    runs_failed: 0,
                }),
                batches,
            }),
        }
    }
}

/// Gates scheduler runs behind debounce, cooldown, an in-flight guard and
/// signature memoization. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct RecomputeController {
    inner: Arc<Inner>,
}

impl RecomputeController {
    /// Start building a controller over an item store.
    pub fn builder(storage: Arc<dyn Storage>, config: PlannerConfig) -> RecomputeControllerBuilder {
        RecomputeControllerBuilder {
            storage,
            config,
            clock: None,
            timer: None,
            statistics: None,
            runtime: None,
        }
    }

    /// Controller with default clock, timer and statistics.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn new(storage: Arc<dyn Storage>, config: PlannerConfig) -> Self {
        Self::builder(storage, config).build()
    }

    /// Current phase.
    pub fn phase(&self) -> ControllerPhase {
        self.inner.lock_gate().phase.kind()
    }

    /// Snapshot of the controller's bookkeeping.
    pub fn status(&self) -> RecomputeStatus {
        let gate = self.inner.lock_gate();
        RecomputeStatus {
            phase: gate.phase.kind(),
            last_signature: gate.last_signature,
            last_run: gate.last_run,
            last_failure: gate.last_failure,
            runs_completed: gate.runs_completed,
            runs_skipped: gate.runs_skipped,
            runs_failed: gate.runs_failed,
        }
    }

    /// Receive one [`BatchComplete`] per run that wrote predictions.
    pub fn subscribe(&self) -> broadcast::Receiver<BatchComplete> {
        self.inner.batches.subscribe()
    }

    /// React to a change in the item store.
    pub fn notify(&self, change: &ChangeNotification) -> NotifyOutcome {
        let inner = &self.inner;
        let own_write = change.is_self_inflicted()
            || (inner.suppressing.load(Ordering::Acquire)
                && change.field == ItemField::PredictedCompletion);
        if own_write {
            trace!(item_id = ?change.item_id, "Ignoring the planner's own write");
            return NotifyOutcome::Suppressed;
        }

        let mut gate = inner.lock_gate();
        let cooldown_left = self.cooldown_left(&gate);
        let delay = inner.config.debounce().max(cooldown_left);
        let pending_force = match gate.phase {
            Phase::TimerPending { force, .. } => force,
            _ => false,
        };
        match gate.phase.kind() {
            ControllerPhase::Running => {
                request_follow_up(&mut gate.phase, FollowUp::Debounced);
                debug!(item_id = ?change.item_id, "Change during run, follow-up recorded");
                NotifyOutcome::Deferred
            }
            ControllerPhase::TimerPending => {
                self.arm_timer(&mut gate, delay, pending_force);
                trace!(item_id = ?change.item_id, "Debounce timer restarted");
                NotifyOutcome::Restarted
            }
            ControllerPhase::Idle => {
                self.arm_timer(&mut gate, delay, false);
                if cooldown_left.is_zero() {
                    debug!(item_id = ?change.item_id, "Debounce timer armed");
                    NotifyOutcome::Scheduled
                } else {
                    debug!(
                        item_id = ?change.item_id,
                        cooldown_left_ms = cooldown_left.as_millis() as u64,
                        "Change during cooldown, run held until it ends"
                    );
                    NotifyOutcome::CoolingDown
                }
            }
        }
    }

    /// Time until the cooldown after the last run ends (zero once over).
    fn cooldown_left(&self, gate: &Gate) -> Duration {
        gate.last_run.map_or(Duration::ZERO, |last| {
            let since = self.inner.clock.instant().saturating_duration_since(last);
            self.inner.config.cooldown().saturating_sub(since)
        })
    }

    /// Run now, cancelling any pending debounce timer. Memoization is
    /// bypassed. Coalesces into a follow-up run if one is already running.
    pub async fn compute_now(&self) -> RunOutcome {
        {
            let mut gate = self.inner.lock_gate();
            if !self.enter_running(&mut gate, FollowUp::Forced) {
                debug!(reason = %CoreError::RunAlreadyInProgress, "Compute-now coalesced");
                return RunOutcome::Coalesced;
            }
        }
        self.execute(true).await
    }

    /// Feed a change stream into [`notify`](Self::notify) until it closes.
    pub fn spawn_listener(
        &self,
        mut changes: broadcast::Receiver<ChangeNotification>,
    ) -> JoinHandle<()> {
        let controller = self.clone();
        self.inner.runtime.spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) => {
                        controller.notify(&change);
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "Change listener lagged, treating as a reload");
                        controller.notify(&ChangeNotification::store_reloaded());
                    }
                    Err(RecvError::Closed) => {
                        debug!("Change stream closed, listener stopping");
                        break;
                    }
                }
            }
        })
    }

    /// Arm (or re-arm) the single debounce timer.
    fn arm_timer(&self, gate: &mut Gate, delay: Duration, force: bool) {
        if let Phase::TimerPending { handle, .. } = std::mem::replace(&mut gate.phase, Phase::Idle) {
            handle.cancel();
        }

        gate.generation += 1;
        let generation = gate.generation;
        let weak = Arc::downgrade(&self.inner);
        let handle = self.inner.timer.start(
            delay,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    RecomputeController { inner }.on_timer_fired(generation, force);
                }
            }),
        );
        gate.phase = Phase::TimerPending {
            generation,
            handle,
            force,
        };
    }

    fn on_timer_fired(&self, generation: u64, force: bool) {
        let mut gate = self.inner.lock_gate();
        match gate.phase {
            Phase::TimerPending { generation: armed, .. } if armed == generation => {}
            _ => {
                trace!(generation, "Stale debounce timer ignored");
                return;
            }
        }
        // The timer has fired; its handle has nothing left to cancel.
        gate.phase = Phase::Idle;
        let follow_up = if force { FollowUp::Forced } else { FollowUp::Debounced };
        if !self.enter_running(&mut gate, follow_up) {
            return;
        }
        drop(gate);

        let controller = self.clone();
        self.inner.runtime.spawn(async move {
            controller.execute(force).await;
        });
    }

    /// Claim the in-flight flag and move to `Running`. On contention the
    /// running run gets `contended` as its follow-up instead.
    fn enter_running(&self, gate: &mut Gate, contended: FollowUp) -> bool {
        let claimed = self
            .inner
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if !claimed {
            request_follow_up(&mut gate.phase, contended);
            return false;
        }

        gate.run_signature = None;
        let previous = std::mem::replace(&mut gate.phase, Phase::Running { follow_up: None });
        if let Phase::TimerPending { handle, .. } = previous {
            handle.cancel();
        }
        true
    }

    /// Run the body on its own task so neither a panic nor a dropped caller
    /// can leave the controller stuck in `Running`.
    async fn execute(&self, force: bool) -> RunOutcome {
        let run_id = RunId::new();
        let span = info_span!(
            "recompute",
            %run_id,
            force,
            signature = field::Empty,
            items = field::Empty
        );

        let controller = self.clone();
        let supervisor = async move {
            let started = controller.inner.clock.instant();
            info!("Recompute started");

            let body = {
                let controller = controller.clone();
                controller
                    .inner
                    .runtime
                    .clone()
                    .spawn(async move { controller.run_body(run_id, force).await }.in_current_span())
            };
            let result = match body.await {
                Ok(result) => result,
                Err(e) if e.is_panic() => Err(RecomputeError::Panicked(panic_message(e.into_panic()))),
                Err(_) => Err(RecomputeError::Aborted),
            };
            controller.finish(result, started)
        }
        .instrument(span);

        match self.inner.runtime.spawn(supervisor).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(%run_id, error = %e, "Recompute supervisor lost");
                RunOutcome::Failed(RecomputeError::Aborted)
            }
        }
    }

    async fn run_body(&self, run_id: RunId, force: bool) -> Result<RunBody, RecomputeError> {
        let inner = &self.inner;
        let started = inner.clock.instant();
        let now = inner.clock.now();

        let rows = inner.storage.list_items().await?;
        let items: Vec<WorkItem> = rows
            .iter()
            .map(|row| WorkItem::from_row(row, &inner.date_format))
            .collect();

        let stats = inner.statistics.refresh(&items, now.date()).await?;
        let fallback = inner.estimator.fallback(stats.long_run_average);
        let (capacity, capacity_source) =
            match inner.estimator.daily_capacity(&stats.history, now.date(), &fallback) {
                Ok(estimate) => (inner.estimator.snapshot(estimate.daily_capacity), Some(estimate.source)),
                Err(e) => {
                    warn!(error = %e, "Scheduling with zero capacity");
                    (CapacitySnapshot::zero(), None)
                }
            };

        let signature = RunSignature::new(stats.total_remaining, capacity.daily_capacity, items.len());
        let span = Span::current();
        span.record("signature", field::display(&signature));
        span.record("items", items.len() as u64);

        let unchanged = {
            let mut gate = inner.lock_gate();
            gate.run_signature = Some(signature);
            gate.last_signature == Some(signature)
        };
        if !force && unchanged {
            return Ok(RunBody::Skipped(signature));
        }

        let schedule = inner.scheduler.schedule(&items, &capacity, now);
        let writes = schedule.to_writes(&inner.date_format);

        inner.suppressing.store(true, Ordering::Release);
        let written = inner.storage.write_predictions(&writes).await;
        inner.suppressing.store(false, Ordering::Release);

        Ok(RunBody::Completed(RunReport {
            run_id,
            signature,
            capacity,
            capacity_source,
            schedule,
            items_written: written?,
            elapsed: inner.clock.instant().saturating_duration_since(started),
        }))
    }

    /// Record the run, return to `Idle`, arm a follow-up if changes arrived
    /// meanwhile, and announce the batch.
    fn finish(&self, result: Result<RunBody, RecomputeError>, started: Instant) -> RunOutcome {
        let inner = &self.inner;
        inner.suppressing.store(false, Ordering::Release);
        let elapsed_ms = inner.clock.instant().saturating_duration_since(started).as_millis() as u64;

        let mut gate = inner.lock_gate();
        gate.last_run = Some(inner.clock.instant());
        let inputs = gate.run_signature.take();
        let outcome = match result {
            Ok(RunBody::Completed(report)) => {
                gate.last_signature = Some(report.signature);
                gate.runs_completed += 1;
                info!(
                    elapsed_ms,
                    scheduled = report.schedule.scheduled_count(),
                    unscheduled = report.schedule.unscheduled_count(),
                    cleared = report.schedule.cleared_count(),
                    items_written = report.items_written,
                    daily_capacity = report.capacity.daily_capacity,
                    "Recompute finished"
                );
                RunOutcome::Completed(report)
            }
            Ok(RunBody::Skipped(signature)) => {
                gate.runs_skipped += 1;
                info!(elapsed_ms, %signature, "Inputs unchanged, recompute skipped");
                RunOutcome::Skipped(signature)
            }
            Err(e) => {
                gate.runs_failed += 1;
                gate.last_failure = inputs;
                error!(
                    elapsed_ms,
                    signature = ?inputs,
                    last_signature = ?gate.last_signature,
                    error = %e,
                    "Recompute failed"
                );
                RunOutcome::Failed(e)
            }
        };

        let follow_up = match gate.phase {
            Phase::Running { follow_up } => follow_up,
            _ => None,
        };
        gate.phase = Phase::Idle;
        inner.in_flight.store(false, Ordering::Release);
        if let Some(follow_up) = follow_up {
            let force = follow_up == FollowUp::Forced;
            debug!(force, "Requests arrived during the run, arming follow-up");
            self.arm_timer(&mut gate, inner.config.debounce(), force);
        }
        drop(gate);

        if let RunOutcome::Completed(report) = &outcome {
            let batch = BatchComplete {
                run_id: report.run_id,
                items_written: report.items_written,
                finished_at: chrono::Utc::now(),
            };
            if inner.batches.send(batch).is_err() {
                trace!("No batch subscribers");
            }
        }
        outcome
    }
}

/// Record a follow-up on a running phase, keeping the stronger request.
fn request_follow_up(phase: &mut Phase, requested: FollowUp) {
    if let Phase::Running { follow_up } = phase {
        *follow_up = Some(follow_up.map_or(requested, |current| current.max(requested)));
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
