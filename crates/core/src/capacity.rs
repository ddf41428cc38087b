//! Capacity model - how much area the line produces per day.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Resolved capacity for one planning run. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CapacitySnapshot {
    /// Area units the line produces in one full working day
    pub daily_capacity: f64,
    /// Area units a single item may consume in one day
    pub per_item_daily_cap: f64,
}

impl CapacitySnapshot {
    /// Build a snapshot. The per-item cap is clamped to `[0, daily_capacity]`.
    pub fn new(daily_capacity: f64, per_item_daily_cap: f64) -> Self {
        let daily_capacity = sanitize(daily_capacity);
        Self {
            daily_capacity,
            per_item_daily_cap: sanitize(per_item_daily_cap).min(daily_capacity),
        }
    }

    /// Snapshot with no per-item restriction.
    pub fn uncapped(daily_capacity: f64) -> Self {
        Self::new(daily_capacity, daily_capacity)
    }

    /// Snapshot representing "no capacity known".
    pub fn zero() -> Self {
        Self::new(0.0, 0.0)
    }

    /// Whether any work can be allocated at all.
    pub fn is_available(&self) -> bool {
        self.daily_capacity > 0.0 && self.per_item_daily_cap > 0.0
    }
}

fn sanitize(v: f64) -> f64 {
    if v.is_finite() && v > 0.0 {
        v
    } else {
        0.0
    }
}

/// Area completed on one production day.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyOutput {
    /// Production day
    pub date: NaiveDate,
    /// Area units finished that day
    pub completed_workload: f64,
}

impl DailyOutput {
    /// Create a record.
    pub fn new(date: NaiveDate, completed_workload: f64) -> Self {
        Self {
            date,
            completed_workload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cap_is_clamped_to_daily_capacity() {
        let snapshot = CapacitySnapshot::new(80.0, 120.0);
        assert_eq!(snapshot.per_item_daily_cap, 80.0);
        assert!(snapshot.is_available());
    }

    #[test]
    fn test_invalid_values_collapse_to_zero() {
        let snapshot = CapacitySnapshot::new(f64::NAN, -4.0);
        assert_eq!(snapshot.daily_capacity, 0.0);
        assert_eq!(snapshot.per_item_daily_cap, 0.0);
        assert!(!snapshot.is_available());
        assert!(!CapacitySnapshot::zero().is_available());
    }
}
