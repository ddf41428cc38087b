//! Capacity and calendar (Layer 2)
//!
//! Working-day calendar, daily capacity estimation and throughput
//! statistics feeding the completion scheduler.

#![warn(missing_docs)]

pub mod calendar;
pub mod estimator;
pub mod stats;

pub use calendar::WorkCalendar;
pub use estimator::{CapacityEstimate, CapacityEstimator, CapacityFallback, CapacitySource};
pub use stats::{total_remaining, StatisticsProvider, StoreStatistics, ThroughputStats};
