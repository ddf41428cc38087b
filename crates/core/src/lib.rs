//! LinePlan core data models.
//!
//! This crate defines the data structures shared by the production
//! completion planner: work items, capacity snapshots, store notifications
//! and configuration.

#![warn(missing_docs)]

// Core identities
mod id;

// Production queue
mod item;
mod capacity;
mod event;

// Configuration and errors
mod config;
mod error;

// Re-exports
pub use id::*;

pub use item::{parse_ready_date, parse_workload, ItemRow, ItemStatus, WorkItem};
pub use capacity::{CapacitySnapshot, DailyOutput};
pub use event::{BatchComplete, ChangeNotification, ChangeOrigin, ItemField};
pub use config::{
    CalendarConfig, CapacityConfig, OutputConfig, PlannerConfig, RecomputeConfig, SchedulerConfig,
};
pub use error::{CoreError, Result};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;

/// Relative tolerance for area comparisons.
pub const EPSILON: f64 = 1e-6;

/// `a >= b` within a relative tolerance.
pub fn approx_ge(a: f64, b: f64) -> bool {
    a >= b - EPSILON * b.abs().max(1.0)
}

/// `v <= 0` within a tolerance relative to `scale`.
pub fn approx_le_zero(v: f64, scale: f64) -> bool {
    v <= EPSILON * scale.abs().max(1.0)
}
