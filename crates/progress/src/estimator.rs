//! Daily capacity estimation.

use chrono::{Duration, NaiveDate};
use lineplan_core::{CapacityConfig, CapacitySnapshot, CoreError, DailyOutput};
use tracing::{debug, warn};

use crate::calendar::WorkCalendar;

/// Where a capacity figure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacitySource {
    /// Trailing-window average of recorded output
    RollingAverage,
    /// Persisted long-run average
    LongRunAverage,
    /// Work hours per day times the configured hourly rate
    Static,
}

impl CapacitySource {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            CapacitySource::RollingAverage => "rolling-average",
            CapacitySource::LongRunAverage => "long-run-average",
            CapacitySource::Static => "static",
        }
    }
}

impl std::fmt::Display for CapacitySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved daily capacity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CapacityEstimate {
    /// Area units per working day (> 0)
    pub daily_capacity: f64,
    /// Source that produced the value
    pub source: CapacitySource,
}

/// Secondary sources consulted when history is insufficient.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CapacityFallback {
    /// Persisted long-run average, if any
    pub long_run_average: Option<f64>,
    /// Static constant
    pub static_daily: f64,
}

/// Daily capacity estimator.
#[derive(Debug, Clone)]
pub struct CapacityEstimator {
    window_days: u32,
    rate_per_hour: f64,
    per_item_cap_ratio: f64,
    per_item_daily_cap: Option<f64>,
    minutes_per_day: i64,
}

impl CapacityEstimator {
    /// Create an estimator for the given calendar's work window.
    pub fn new(config: &CapacityConfig, calendar: &WorkCalendar) -> Self {
        Self {
            window_days: config.window_days,
            rate_per_hour: config.rate_per_hour,
            per_item_cap_ratio: config.per_item_cap_ratio,
            per_item_daily_cap: config.per_item_daily_cap,
            minutes_per_day: calendar.minutes_per_day(),
        }
    }

    /// Work hours per day times the hourly rate.
    pub fn static_capacity(&self) -> f64 {
        self.minutes_per_day as f64 / 60.0 * self.rate_per_hour
    }

    /// Fallback chain with the given long-run average.
    pub fn fallback(&self, long_run_average: Option<f64>) -> CapacityFallback {
        CapacityFallback {
            long_run_average,
            static_daily: self.static_capacity(),
        }
    }

    /// Average output per production day over the trailing window ending
    /// before `today`. Days without positive output are not counted.
    pub fn rolling_average(&self, history: &[DailyOutput], today: NaiveDate) -> Option<f64> {
        let window_start = today - Duration::days(i64::from(self.window_days));
        let (sum, days) = history
            .iter()
            .filter(|o| o.date >= window_start && o.date < today)
            .filter(|o| o.completed_workload.is_finite() && o.completed_workload > 0.0)
            .fold((0.0, 0u32), |(sum, days), o| (sum + o.completed_workload, days + 1));

        (days > 0).then(|| sum / f64::from(days))
    }

    /// Resolve the daily capacity: rolling average, then the long-run
    /// average, then the static constant.
    pub fn daily_capacity(
        &self,
        history: &[DailyOutput],
        today: NaiveDate,
        fallback: &CapacityFallback,
    ) -> Result<CapacityEstimate, CoreError> {
        let candidates = [
            (self.rolling_average(history, today), CapacitySource::RollingAverage),
            (fallback.long_run_average, CapacitySource::LongRunAverage),
            (Some(fallback.static_daily), CapacitySource::Static),
        ];

        for (value, source) in candidates {
            match value {
                Some(v) if v.is_finite() && v > 0.0 => {
                    debug!(daily_capacity = v, source = %source, "Capacity resolved");
                    return Ok(CapacityEstimate {
                        daily_capacity: v,
                        source,
                    });
                }
                _ => debug!(source = %source, "Capacity source unusable, falling back"),
            }
        }

        warn!(
            history_days = history.len(),
            static_daily = fallback.static_daily,
            "No capacity source is positive"
        );
        Err(CoreError::CapacityUnavailable)
    }

    /// Per-run capacity snapshot for a resolved daily capacity.
    pub fn snapshot(&self, daily_capacity: f64) -> CapacitySnapshot {
        let cap = self
            .per_item_daily_cap
            .unwrap_or(daily_capacity * self.per_item_cap_ratio);
        CapacitySnapshot::new(daily_capacity, cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, m, d).unwrap()
    }

    fn estimator(config: CapacityConfig) -> CapacityEstimator {
        CapacityEstimator::new(&config, &WorkCalendar::default())
    }

    #[test]
    fn test_static_capacity_from_window() {
        let est = estimator(CapacityConfig::default());
        assert_eq!(est.static_capacity(), 80.0);
    }

    #[test]
    fn test_rolling_average_uses_trailing_window_only() {
        let est = estimator(CapacityConfig::default());
        let history = vec![
            DailyOutput::new(day(1, 2), 500.0),
            DailyOutput::new(day(3, 2), 60.0),
            DailyOutput::new(day(3, 3), 100.0),
            DailyOutput::new(day(3, 4), 0.0),
            DailyOutput::new(day(3, 10), 999.0),
        ];

        assert_eq!(est.rolling_average(&history, day(3, 10)), Some(80.0));
    }

    #[test]
    fn test_fallback_order() {
        let est = estimator(CapacityConfig::default());
        let today = day(3, 10);

        let from_history = est
            .daily_capacity(&[DailyOutput::new(day(3, 9), 64.0)], today, &est.fallback(Some(70.0)))
            .unwrap();
        assert_eq!(from_history.source, CapacitySource::RollingAverage);
        assert_eq!(from_history.daily_capacity, 64.0);

        let from_long_run = est.daily_capacity(&[], today, &est.fallback(Some(70.0))).unwrap();
        assert_eq!(from_long_run.source, CapacitySource::LongRunAverage);
        assert_eq!(from_long_run.daily_capacity, 70.0);

        let from_static = est.daily_capacity(&[], today, &est.fallback(Some(0.0))).unwrap();
        assert_eq!(from_static.source, CapacitySource::Static);
        assert_eq!(from_static.daily_capacity, 80.0);
    }

    #[test]
    fn test_all_sources_zero_is_unavailable() {
        let est = estimator(CapacityConfig {
            rate_per_hour: 0.0,
            ..CapacityConfig::default()
        });
        let result = est.daily_capacity(&[], day(3, 10), &est.fallback(None));
        assert_eq!(result, Err(CoreError::CapacityUnavailable));
    }

    #[test]
    fn test_snapshot_caps() {
        let ratio = estimator(CapacityConfig {
            per_item_cap_ratio: 0.5,
            ..CapacityConfig::default()
        });
        assert_eq!(ratio.snapshot(80.0).per_item_daily_cap, 40.0);

        let absolute = estimator(CapacityConfig {
            per_item_daily_cap: Some(200.0),
            ..CapacityConfig::default()
        });
        assert_eq!(absolute.snapshot(80.0).per_item_daily_cap, 80.0);
    }
}
