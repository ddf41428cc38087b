//! Planner configuration.
//!
//! Every field has a default, so a partial `config.json` only needs to
//! mention the values it overrides.

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Top-level planner configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Business calendar
    pub calendar: CalendarConfig,
    /// Capacity estimation
    pub capacity: CapacityConfig,
    /// Allocation limits
    pub scheduler: SchedulerConfig,
    /// Debounce and cooldown
    pub recompute: RecomputeConfig,
    /// Output formatting
    pub output: OutputConfig,
}

impl PlannerConfig {
    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.calendar.work_end <= self.calendar.work_start {
            return Err(CoreError::Config(format!(
                "work window {}..{} is empty",
                self.calendar.work_start, self.calendar.work_end
            )));
        }
        if !(self.capacity.rate_per_hour.is_finite() && self.capacity.rate_per_hour >= 0.0) {
            return Err(CoreError::Config(format!(
                "rate_per_hour must be >= 0, got {}",
                self.capacity.rate_per_hour
            )));
        }
        if !(self.capacity.per_item_cap_ratio > 0.0 && self.capacity.per_item_cap_ratio <= 1.0) {
            return Err(CoreError::Config(format!(
                "per_item_cap_ratio must be in (0, 1], got {}",
                self.capacity.per_item_cap_ratio
            )));
        }
        if let Some(cap) = self.capacity.per_item_daily_cap {
            if !(cap.is_finite() && cap > 0.0) {
                return Err(CoreError::Config(format!(
                    "per_item_daily_cap must be > 0, got {cap}"
                )));
            }
        }
        if self.capacity.window_days == 0 {
            return Err(CoreError::Config("window_days must be >= 1".to_string()));
        }
        if self.scheduler.max_horizon_days == 0 {
            return Err(CoreError::Config("max_horizon_days must be >= 1".to_string()));
        }
        Ok(())
    }
}

/// Work window and holidays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalendarConfig {
    /// Daily window start
    #[serde(with = "hhmm")]
    pub work_start: NaiveTime,
    /// Daily window end (exclusive)
    #[serde(with = "hhmm")]
    pub work_end: NaiveTime,
    /// Non-working dates besides weekends
    pub holidays: Vec<NaiveDate>,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            work_start: NaiveTime::from_hms_opt(7, 0, 0).unwrap_or(NaiveTime::MIN),
            work_end: NaiveTime::from_hms_opt(15, 0, 0).unwrap_or(NaiveTime::MIN),
            holidays: Vec::new(),
        }
    }
}

/// Capacity estimation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapacityConfig {
    /// Trailing window for the rolling average
    pub window_days: u32,
    /// Static throughput used when no history exists (area units per hour)
    pub rate_per_hour: f64,
    /// Share of the daily capacity one item may take per day
    pub per_item_cap_ratio: f64,
    /// Absolute per-item daily cap; overrides the ratio when set
    pub per_item_daily_cap: Option<f64>,
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            window_days: 30,
            rate_per_hour: 10.0,
            per_item_cap_ratio: 1.0,
            per_item_daily_cap: None,
        }
    }
}

/// Allocation limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Days an item may span before it is given up as unschedulable
    pub max_horizon_days: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_horizon_days: 3650,
        }
    }
}

/// Recompute gating.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecomputeConfig {
    /// Quiet period before a burst of changes triggers a run
    pub debounce_ms: u64,
    /// Minimum gap after a run before notifications may start another
    pub cooldown_ms: u64,
}

impl Default for RecomputeConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 300,
            cooldown_ms: 1500,
        }
    }
}

impl RecomputeConfig {
    /// Debounce window.
    pub fn debounce(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.debounce_ms)
    }

    /// Cooldown window.
    pub fn cooldown(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.cooldown_ms)
    }
}

/// Output formatting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// chrono format for predicted dates written to the store
    pub date_format: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            date_format: "%d.%m.%Y".to_string(),
        }
    }
}

/// `HH:MM` (seconds optional) time-of-day serde.
mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let text = String::deserialize(d)?;
        NaiveTime::parse_from_str(&text, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(&text, "%H:%M:%S"))
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PlannerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.recompute.debounce_ms, 300);
        assert_eq!(config.capacity.window_days, 30);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let json = r#"{
            "calendar": { "work_start": "06:30", "holidays": ["2026-12-25"] },
            "recompute": { "cooldown_ms": 50 }
        }"#;
        let config: PlannerConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.calendar.work_start, NaiveTime::from_hms_opt(6, 30, 0).unwrap());
        assert_eq!(config.calendar.work_end, NaiveTime::from_hms_opt(15, 0, 0).unwrap());
        assert_eq!(config.calendar.holidays.len(), 1);
        assert_eq!(config.recompute.cooldown_ms, 50);
        assert_eq!(config.recompute.debounce_ms, 300);
        assert_eq!(config.output.date_format, "%d.%m.%Y");
    }

    #[test]
    fn test_validate_rejects_inverted_window() {
        let mut config = PlannerConfig::default();
        config.calendar.work_end = config.calendar.work_start;
        assert!(matches!(config.validate(), Err(CoreError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_bad_ratio() {
        let mut config = PlannerConfig::default();
        config.capacity.per_item_cap_ratio = 1.5;
        assert!(config.validate().is_err());
        config.capacity.per_item_cap_ratio = 0.0;
        assert!(config.validate().is_err());
    }
}
