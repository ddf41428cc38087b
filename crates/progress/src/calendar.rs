//! Business calendar: working days and the daily work window.

use std::collections::BTreeSet;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use lineplan_core::{CalendarConfig, CoreError};
use tracing::warn;

/// Upper bound when searching for the next working day.
const MAX_SCAN_DAYS: u32 = 3660;

/// Working days (weekdays minus holidays) with a fixed daily window
/// `[work_start, work_end)`.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkCalendar {
    work_start: NaiveTime,
    work_end: NaiveTime,
    holidays: BTreeSet<NaiveDate>,
}

impl WorkCalendar {
    /// Create a calendar without holidays.
    pub fn new(work_start: NaiveTime, work_end: NaiveTime) -> Self {
        Self {
            work_start,
            work_end,
            holidays: BTreeSet::new(),
        }
    }

    /// Build from configuration.
    pub fn from_config(config: &CalendarConfig) -> Self {
        Self::new(config.work_start, config.work_end).with_holidays(config.holidays.iter().copied())
    }

    /// Add holidays.
    pub fn with_holidays(mut self, holidays: impl IntoIterator<Item = NaiveDate>) -> Self {
        self.holidays.extend(holidays);
        self
    }

    /// Add a single holiday.
    pub fn add_holiday(&mut self, date: NaiveDate) {
        self.holidays.insert(date);
    }

    /// Window start.
    pub fn work_start(&self) -> NaiveTime {
        self.work_start
    }

    /// Window end.
    pub fn work_end(&self) -> NaiveTime {
        self.work_end
    }

    /// False for Saturdays, Sundays and configured holidays.
    pub fn is_working_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !self.holidays.contains(&date)
    }

    /// Length of the work window.
    pub fn minutes_per_day(&self) -> i64 {
        (self.work_end - self.work_start).num_minutes().max(0)
    }

    /// Window start on `date`.
    pub fn day_start(&self, date: NaiveDate) -> NaiveDateTime {
        date.and_time(self.work_start)
    }

    /// Window end on `date`.
    pub fn day_end(&self, date: NaiveDate) -> NaiveDateTime {
        date.and_time(self.work_end)
    }

    /// First working day strictly after `date`.
    pub fn next_working_day(&self, date: NaiveDate) -> Option<NaiveDate> {
        let mut day = date;
        for _ in 0..MAX_SCAN_DAYS {
            day = day.succ_opt()?;
            if self.is_working_day(day) {
                return Some(day);
            }
        }
        None
    }

    /// `date` itself when it is a working day, otherwise the next one.
    pub fn working_day_on_or_after(&self, date: NaiveDate) -> Option<NaiveDate> {
        if self.is_working_day(date) {
            Some(date)
        } else {
            self.next_working_day(date)
        }
    }

    /// Move `ts` onto working time: unchanged inside a window, the window
    /// start when earlier on a working day, otherwise the next window start.
    pub fn align_to_working_time(&self, ts: NaiveDateTime) -> Option<NaiveDateTime> {
        let date = ts.date();
        if self.is_working_day(date) && ts < self.day_end(date) {
            return Some(ts.max(self.day_start(date)));
        }
        self.next_working_day(date).map(|d| self.day_start(d))
    }

    /// Minutes from `ts` until the end of its day's window (0 outside it).
    pub fn minutes_left_in_window(&self, ts: NaiveDateTime) -> i64 {
        let date = ts.date();
        if !self.is_working_day(date) {
            return 0;
        }
        let from = ts.max(self.day_start(date));
        (self.day_end(date) - from).num_minutes().max(0)
    }

    /// Working minutes inside `[start, end]`, or `InvalidRange` when the
    /// range is inverted.
    pub fn try_working_minutes_between(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<i64, CoreError> {
        if end < start {
            return Err(CoreError::InvalidRange { start, end });
        }

        let total = start
            .date()
            .iter_days()
            .take_while(|d| *d <= end.date())
            .filter(|d| self.is_working_day(*d))
            .map(|d| {
                let lo = start.max(self.day_start(d));
                let hi = end.min(self.day_end(d));
                (hi - lo).num_minutes().max(0)
            })
            .sum();
        Ok(total)
    }

    /// Working minutes inside `[start, end]`. An inverted range is logged
    /// and counts as zero.
    pub fn working_minutes_between(&self, start: NaiveDateTime, end: NaiveDateTime) -> i64 {
        self.try_working_minutes_between(start, end).unwrap_or_else(|e| {
            warn!(error = %e, "Working minutes requested for inverted range");
            0
        })
    }

    /// Timestamp `minutes` after `ts`.
    pub fn advance(ts: NaiveDateTime, minutes: i64) -> NaiveDateTime {
        ts + Duration::minutes(minutes)
    }
}

impl Default for WorkCalendar {
    fn default() -> Self {
        Self::from_config(&CalendarConfig::default())
    }
}
