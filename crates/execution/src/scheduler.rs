//! Completion scheduling: day-by-day allocation of one shared production
//! capacity across the ordered item queue.
//!
//! Items are served strictly in queue order. A single cursor walks through
//! working time; every item consumes capacity from where the previous item
//! stopped, so partially used days carry over between items.

use chrono::{NaiveDate, NaiveDateTime};
use lineplan_core::{
    approx_ge, approx_le_zero, CapacitySnapshot, ItemId, ItemStatus, SchedulerConfig, WorkItem,
};
use lineplan_progress::WorkCalendar;
use tracing::{debug, warn};

/// Why a single item could not be scheduled.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScheduleError {
    /// No capacity is available on a fresh working day
    #[error("no production capacity available")]
    NoCapacity,

    /// Workload is not a finite number
    #[error("workload {0} is not a finite number")]
    InvalidWorkload(f64),

    /// The item would need more days than the planning horizon allows
    #[error("allocation exceeded the {0}-day planning horizon")]
    HorizonExceeded(u32),

    /// The calendar has no working day left to move to
    #[error("no working day found after {0}")]
    CalendarExhausted(NaiveDate),
}

/// Result for one item.
#[derive(Debug, Clone, PartialEq)]
pub enum PredictionOutcome {
    /// Predicted completion day
    Scheduled(NaiveDate),
    /// Item needed allocation but could not be placed
    Unscheduled(ScheduleError),
    /// Done or nothing left to produce; prediction cleared
    Cleared,
}

/// Prediction for one queued item.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    /// Item identifier
    pub item_id: ItemId,
    /// Outcome
    pub outcome: PredictionOutcome,
}

impl Prediction {
    /// Predicted completion day, if scheduled.
    pub fn date(&self) -> Option<NaiveDate> {
        match self.outcome {
            PredictionOutcome::Scheduled(date) => Some(date),
            _ => None,
        }
    }
}

/// Output of one scheduling pass, in queue order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schedule {
    /// One entry per input item
    pub predictions: Vec<Prediction>,
    /// Where allocation started, if anything needed allocation
    pub anchor: Option<NaiveDateTime>,
}

impl Schedule {
    /// Prediction for an item.
    pub fn get(&self, id: &ItemId) -> Option<&Prediction> {
        self.predictions.iter().find(|p| &p.item_id == id)
    }

    /// Predicted day for an item.
    pub fn date_of(&self, id: &ItemId) -> Option<NaiveDate> {
        self.get(id).and_then(Prediction::date)
    }

    /// Number of items given a date.
    pub fn scheduled_count(&self) -> usize {
        self.count(|o| matches!(o, PredictionOutcome::Scheduled(_)))
    }

    /// Number of items that needed allocation but got no date.
    pub fn unscheduled_count(&self) -> usize {
        self.count(|o| matches!(o, PredictionOutcome::Unscheduled(_)))
    }

    /// Number of items whose prediction was cleared.
    pub fn cleared_count(&self) -> usize {
        self.count(|o| matches!(o, PredictionOutcome::Cleared))
    }

    fn count(&self, f: impl Fn(&PredictionOutcome) -> bool) -> usize {
        self.predictions.iter().filter(|p| f(&p.outcome)).count()
    }

    /// Store writes for this schedule, dates rendered with `date_format`.
    pub fn to_writes(&self, date_format: &str) -> Vec<(ItemId, Option<String>)> {
        self.predictions
            .iter()
            .map(|p| (p.item_id.clone(), p.date().map(|d| d.format(date_format).to_string())))
            .collect()
    }
}

/// Position of the production line during one pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduleCursor {
    /// Current moment on the line
    pub current: NaiveDateTime,
    /// Capacity left on the current day
    pub remaining_capacity_today: f64,
}

/// Allocates the shared daily capacity across the queue.
#[derive(Debug, Clone)]
pub struct CompletionScheduler {
    calendar: WorkCalendar,
    max_horizon_days: u32,
}

impl CompletionScheduler {
    /// Create a scheduler over a calendar.
    pub fn new(calendar: WorkCalendar, config: &SchedulerConfig) -> Self {
        Self {
            calendar,
            max_horizon_days: config.max_horizon_days,
        }
    }

    /// Calendar in use.
    pub fn calendar(&self) -> &WorkCalendar {
        &self.calendar
    }

    /// Predict completion days for `items`, starting no earlier than `now`.
    ///
    /// Every item gets an entry. A failure on one item leaves it
    /// unscheduled, restores the cursor and moves on.
    pub fn schedule(
        &self,
        items: &[WorkItem],
        capacity: &CapacitySnapshot,
        now: NaiveDateTime,
    ) -> Schedule {
        let needs_allocation = |item: &WorkItem| {
            let w = item.effective_workload();
            // NaN and +inf need allocation so they surface as InvalidWorkload.
            item.status != ItemStatus::Done && !(w <= 0.0 || approx_le_zero(w, 1.0))
        };

        let mut predictions: Vec<Prediction> = items
            .iter()
            .map(|item| Prediction {
                item_id: item.id.clone(),
                outcome: PredictionOutcome::Cleared,
            })
            .collect();

        let pending: Vec<usize> = (0..items.len()).filter(|&i| needs_allocation(&items[i])).collect();
        if pending.is_empty() {
            return Schedule {
                predictions,
                anchor: None,
            };
        }

        if !capacity.is_available() || self.calendar.minutes_per_day() == 0 {
            warn!(
                daily_capacity = capacity.daily_capacity,
                per_item_daily_cap = capacity.per_item_daily_cap,
                pending = pending.len(),
                "No capacity, leaving every pending item unscheduled"
            );
            for &i in &pending {
                predictions[i].outcome = PredictionOutcome::Unscheduled(ScheduleError::NoCapacity);
            }
            return Schedule {
                predictions,
                anchor: None,
            };
        }

        // Items without a ready date never become the earliest one.
        let earliest_ready = pending.iter().filter_map(|&i| items[i].ready_date).min();
        let anchor = earliest_ready.map_or(now, |ready| ready.max(now));

        let Some(mut cursor) = self.start_cursor(anchor, capacity) else {
            for &i in &pending {
                predictions[i].outcome = PredictionOutcome::Unscheduled(
                    ScheduleError::CalendarExhausted(anchor.date()),
                );
            }
            return Schedule {
                predictions,
                anchor: None,
            };
        };
        let anchor = cursor.current;
        debug!(%anchor, capacity_today = cursor.remaining_capacity_today, "Allocation anchored");

        for &i in &pending {
            let item = &items[i];
            let before = cursor;
            predictions[i].outcome = match self.allocate(&mut cursor, item, capacity) {
                Ok(date) => {
                    debug!(item_id = %item.id, %date, "Item scheduled");
                    PredictionOutcome::Scheduled(date)
                }
                Err(e) => {
                    warn!(item_id = %item.id, error = %e, "Item left unscheduled");
                    cursor = before;
                    PredictionOutcome::Unscheduled(e)
                }
            };
        }

        Schedule {
            predictions,
            anchor: Some(anchor),
        }
    }

    /// Cursor at the first working moment at or after `anchor`. A cursor
    /// starting mid-window gets the prorated share of the day.
    fn start_cursor(
        &self,
        anchor: NaiveDateTime,
        capacity: &CapacitySnapshot,
    ) -> Option<ScheduleCursor> {
        let current = self.calendar.align_to_working_time(anchor)?;
        let day_start = self.calendar.day_start(current.date());
        let remaining_capacity_today = if current == day_start {
            capacity.daily_capacity
        } else {
            self.window_area(current, capacity)
        };
        Some(ScheduleCursor {
            current,
            remaining_capacity_today,
        })
    }

    fn allocate(
        &self,
        cursor: &mut ScheduleCursor,
        item: &WorkItem,
        capacity: &CapacitySnapshot,
    ) -> Result<NaiveDate, ScheduleError> {
        let mut remaining = item.effective_workload();
        if !remaining.is_finite() {
            return Err(ScheduleError::InvalidWorkload(remaining));
        }

        if let Some(ready) = item.ready_date {
            if ready.date() > cursor.current.date() {
                let day = self
                    .calendar
                    .working_day_on_or_after(ready.date())
                    .ok_or(ScheduleError::CalendarExhausted(ready.date()))?;
                self.reset_to(cursor, day, capacity);
            }
        }

        let mut days_spent = 0u32;
        loop {
            while !self.calendar.is_working_day(cursor.current.date()) {
                self.next_day(cursor, capacity)?;
            }

            let available = cursor
                .remaining_capacity_today
                .min(capacity.per_item_daily_cap)
                .min(self.window_area(cursor.current, capacity))
                .max(0.0);

            if approx_ge(available, remaining) {
                let minutes = self.area_to_minutes(remaining, capacity);
                let day_end = self.calendar.day_end(cursor.current.date());
                cursor.current = WorkCalendar::advance(cursor.current, minutes).min(day_end);
                cursor.remaining_capacity_today = (cursor.remaining_capacity_today - remaining).max(0.0);
                return Ok(cursor.current.date());
            }

            let fresh_day = cursor.current == self.calendar.day_start(cursor.current.date())
                && approx_ge(cursor.remaining_capacity_today, capacity.daily_capacity);
            if fresh_day && approx_le_zero(available, capacity.daily_capacity) {
                return Err(ScheduleError::NoCapacity);
            }

            remaining -= available;
            cursor.remaining_capacity_today -= available;
            days_spent += 1;
            if days_spent > self.max_horizon_days {
                return Err(ScheduleError::HorizonExceeded(self.max_horizon_days));
            }
            self.next_day(cursor, capacity)?;
        }
    }

    fn next_day(&self, cursor: &mut ScheduleCursor, capacity: &CapacitySnapshot) -> Result<(), ScheduleError> {
        let today = cursor.current.date();
        let day = self
            .calendar
            .next_working_day(today)
            .ok_or(ScheduleError::CalendarExhausted(today))?;
        self.reset_to(cursor, day, capacity);
        Ok(())
    }

    fn reset_to(&self, cursor: &mut ScheduleCursor, day: NaiveDate, capacity: &CapacitySnapshot) {
        cursor.current = self.calendar.day_start(day);
        cursor.remaining_capacity_today = capacity.daily_capacity;
    }

    /// Area the line can still produce before today's window closes.
    fn window_area(&self, at: NaiveDateTime, capacity: &CapacitySnapshot) -> f64 {
        let minutes = self.calendar.minutes_left_in_window(at) as f64;
        minutes * capacity.daily_capacity / self.calendar.minutes_per_day() as f64
    }

    /// Minutes needed for `area`, rounded up.
    fn area_to_minutes(&self, area: f64, capacity: &CapacitySnapshot) -> i64 {
        let exact = area * self.calendar.minutes_per_day() as f64 / capacity.daily_capacity;
        // Absorb float noise so an exact 240.0000000001 does not become 241.
        (exact - 1e-9 * exact.abs().max(1.0)).ceil().max(0.0) as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    // 2026-03-09 is a Monday.
    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    fn at(d: u32, h: u32, m: u32) -> NaiveDateTime {
        day(d).and_hms_opt(h, m, 0).unwrap()
    }

    fn scheduler() -> CompletionScheduler {
        let calendar = WorkCalendar::new(
            NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(15, 0, 0).unwrap(),
        );
        CompletionScheduler::new(calendar, &SchedulerConfig::default())
    }

    #[test]
    fn test_items_share_a_partially_used_day() {
        let items = vec![WorkItem::new("a", 120.0), WorkItem::new("b", 40.0)];
        let schedule = scheduler().schedule(&items, &CapacitySnapshot::uncapped(80.0), at(9, 7, 0));

        assert_eq!(schedule.date_of(&ItemId::from("a")), Some(day(10)));
        assert_eq!(schedule.date_of(&ItemId::from("b")), Some(day(10)));
        assert_eq!(schedule.anchor, Some(at(9, 7, 0)));
    }

    #[test]
    fn test_day_is_not_reset_between_items() {
        // 30 + 30 fill 60 of 80 on Monday; the third item needs 40 and spills.
        let items = vec![
            WorkItem::new("a", 30.0),
            WorkItem::new("b", 30.0),
            WorkItem::new("c", 40.0),
        ];
        let schedule = scheduler().schedule(&items, &CapacitySnapshot::uncapped(80.0), at(9, 7, 0));

        assert_eq!(schedule.date_of(&ItemId::from("a")), Some(day(9)));
        assert_eq!(schedule.date_of(&ItemId::from("b")), Some(day(9)));
        assert_eq!(schedule.date_of(&ItemId::from("c")), Some(day(10)));
    }

    #[test]
    fn test_mid_day_start_is_prorated() {
        // Starting at 13:00 leaves 2 of 8 hours: 20 units on Monday.
        let items = vec![WorkItem::new("a", 20.0), WorkItem::new("b", 1.0)];
        let schedule = scheduler().schedule(&items, &CapacitySnapshot::uncapped(80.0), at(9, 13, 0));

        assert_eq!(schedule.date_of(&ItemId::from("a")), Some(day(9)));
        assert_eq!(schedule.date_of(&ItemId::from("b")), Some(day(10)));
    }

    #[test]
    fn test_start_after_hours_moves_to_next_working_day() {
        let items = vec![WorkItem::new("a", 10.0)];
        // Friday evening.
        let schedule = scheduler().schedule(&items, &CapacitySnapshot::uncapped(80.0), at(13, 18, 0));

        assert_eq!(schedule.anchor, Some(at(16, 7, 0)));
        assert_eq!(schedule.date_of(&ItemId::from("a")), Some(day(16)));
    }

    #[test]
    fn test_weekends_and_holidays_are_skipped() {
        let calendar = WorkCalendar::new(
            NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(15, 0, 0).unwrap(),
        )
        .with_holidays([day(16)]);
        let scheduler = CompletionScheduler::new(calendar, &SchedulerConfig::default());

        // Friday has 80; the remaining 80 cannot land on Sat, Sun or the Monday holiday.
        let items = vec![WorkItem::new("a", 160.0)];
        let schedule = scheduler.schedule(&items, &CapacitySnapshot::uncapped(80.0), at(13, 7, 0));

        assert_eq!(schedule.date_of(&ItemId::from("a")), Some(day(17)));
    }

    #[test]
    fn test_per_item_cap_limits_daily_progress() {
        let items = vec![WorkItem::new("a", 100.0)];
        let schedule = scheduler().schedule(&items, &CapacitySnapshot::new(80.0, 40.0), at(9, 7, 0));

        // 40 + 40 + 20.
        assert_eq!(schedule.date_of(&ItemId::from("a")), Some(day(11)));
    }

    #[test]
    fn test_ready_date_gates_but_does_not_reorder() {
        let items = vec![
            WorkItem::new("late", 10.0).with_ready_day(day(12)),
            WorkItem::new("early", 10.0).with_ready_day(day(9)),
        ];
        let schedule = scheduler().schedule(&items, &CapacitySnapshot::uncapped(80.0), at(9, 7, 0));

        assert_eq!(schedule.date_of(&ItemId::from("late")), Some(day(12)));
        // Queued behind "late", so it cannot finish before it.
        assert_eq!(schedule.date_of(&ItemId::from("early")), Some(day(12)));
    }

    #[test]
    fn test_ready_date_on_weekend_starts_next_working_day() {
        let items = vec![WorkItem::new("a", 10.0).with_ready_day(day(14))];
        let schedule = scheduler().schedule(&items, &CapacitySnapshot::uncapped(80.0), at(9, 7, 0));

        assert_eq!(schedule.date_of(&ItemId::from("a")), Some(day(16)));
    }

    #[test]
    fn test_missing_ready_date_does_not_gate() {
        let items = vec![
            WorkItem::new("gated", 10.0).with_ready_day(day(11)),
            WorkItem::new("free", 10.0),
        ];
        let schedule = scheduler().schedule(&items, &CapacitySnapshot::uncapped(80.0), at(9, 7, 0));

        // Anchor is the earliest real ready date, not "now".
        assert_eq!(schedule.anchor, Some(at(11, 7, 0)));
        assert_eq!(schedule.date_of(&ItemId::from("free")), Some(day(11)));
    }

    #[test]
    fn test_done_and_empty_items_are_cleared() {
        let items = vec![
            WorkItem::new("done", 50.0).with_status(ItemStatus::Done),
            WorkItem::new("empty", 0.0),
            WorkItem::new("negative", -3.0),
            WorkItem::new("real", 10.0),
        ];
        let schedule = scheduler().schedule(&items, &CapacitySnapshot::uncapped(80.0), at(9, 7, 0));

        assert_eq!(schedule.cleared_count(), 3);
        assert_eq!(schedule.scheduled_count(), 1);
        assert_eq!(schedule.get(&ItemId::from("done")).unwrap().outcome, PredictionOutcome::Cleared);
    }

    #[test]
    fn test_zero_capacity_leaves_items_unscheduled() {
        let items = vec![WorkItem::new("a", 10.0), WorkItem::new("b", 5.0)];
        let schedule = scheduler().schedule(&items, &CapacitySnapshot::zero(), at(9, 7, 0));

        assert_eq!(schedule.unscheduled_count(), 2);
        assert!(schedule.predictions.iter().all(|p| p.date().is_none()));
    }

    #[test]
    fn test_negative_infinite_workload_is_cleared() {
        let items = vec![
            WorkItem::new("gone", f64::NEG_INFINITY),
            WorkItem::new("nan", f64::NAN),
            WorkItem::new("real", 10.0),
        ];
        let schedule = scheduler().schedule(&items, &CapacitySnapshot::uncapped(80.0), at(9, 7, 0));

        assert_eq!(schedule.get(&ItemId::from("gone")).unwrap().outcome, PredictionOutcome::Cleared);
        assert!(matches!(
            schedule.get(&ItemId::from("nan")).unwrap().outcome,
            PredictionOutcome::Unscheduled(ScheduleError::InvalidWorkload(_))
        ));
        assert_eq!(schedule.date_of(&ItemId::from("real")), Some(day(9)));
    }

    #[test]
    fn test_negligible_per_item_cap_fails_each_item_on_a_fresh_day() {
        // Capacity is nominally available, but no item can take anything.
        let capacity = CapacitySnapshot::new(80.0, 1e-9);
        assert!(capacity.is_available());

        let items = vec![
            WorkItem::new("a", 40.0),
            WorkItem::new("b", 10.0),
            WorkItem::new("done", 5.0).with_status(ItemStatus::Done),
        ];
        let schedule = scheduler().schedule(&items, &capacity, at(9, 7, 0));

        for id in ["a", "b"] {
            assert_eq!(
                schedule.get(&ItemId::from(id)).unwrap().outcome,
                PredictionOutcome::Unscheduled(ScheduleError::NoCapacity),
                "{id}"
            );
        }
        assert_eq!(schedule.get(&ItemId::from("done")).unwrap().outcome, PredictionOutcome::Cleared);
        assert_eq!(schedule.anchor, Some(at(9, 7, 0)));
    }

    #[test]
    fn test_failing_item_does_not_abort_batch() {
        let items = vec![
            WorkItem::new("bad", f64::INFINITY),
            WorkItem::new("good", 10.0),
        ];
        let schedule = scheduler().schedule(&items, &CapacitySnapshot::uncapped(80.0), at(9, 7, 0));

        assert_eq!(
            schedule.get(&ItemId::from("bad")).unwrap().outcome,
            PredictionOutcome::Unscheduled(ScheduleError::InvalidWorkload(f64::INFINITY))
        );
        assert_eq!(schedule.date_of(&ItemId::from("good")), Some(day(9)));
    }

    #[test]
    fn test_horizon_exceeded_restores_cursor() {
        let calendar = WorkCalendar::default();
        let scheduler = CompletionScheduler::new(calendar, &SchedulerConfig { max_horizon_days: 5 });
        let items = vec![WorkItem::new("huge", 10_000.0), WorkItem::new("small", 10.0)];
        let schedule = scheduler.schedule(&items, &CapacitySnapshot::uncapped(80.0), at(9, 7, 0));

        assert_eq!(
            schedule.get(&ItemId::from("huge")).unwrap().outcome,
            PredictionOutcome::Unscheduled(ScheduleError::HorizonExceeded(5))
        );
        assert_eq!(schedule.date_of(&ItemId::from("small")), Some(day(9)));
    }

    #[test]
    fn test_to_writes_formats_dates() {
        let items = vec![WorkItem::new("a", 10.0), WorkItem::new("b", 0.0)];
        let schedule = scheduler().schedule(&items, &CapacitySnapshot::uncapped(80.0), at(9, 7, 0));

        let writes = schedule.to_writes("%d.%m.%Y");
        assert_eq!(writes[0], (ItemId::from("a"), Some("09.03.2026".to_string())));
        assert_eq!(writes[1], (ItemId::from("b"), None));
    }
}
