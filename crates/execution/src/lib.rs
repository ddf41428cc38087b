//! Execution layer - completion scheduling and recompute control.
//!
//! [`CompletionScheduler`] turns a queue snapshot and a capacity snapshot
//! into predicted completion days. [`RecomputeController`] decides when it
//! runs: debounced on store changes, on demand, never on its own writes.

#![warn(missing_docs)]

pub mod clock;
pub mod scheduler;
pub mod signature;
pub mod controller;

pub use clock::{Clock, FixedClock, SystemClock, Timer, TimerCallback, TimerHandle, TokioTimer};
pub use scheduler::{
    CompletionScheduler, Prediction, PredictionOutcome, Schedule, ScheduleCursor, ScheduleError,
};
pub use signature::RunSignature;
pub use controller::{
    ControllerPhase, NotifyOutcome, RecomputeController, RecomputeControllerBuilder,
    RecomputeError, RecomputeStatus, RunOutcome, RunReport,
};
