//! Work item model - the unit of production the planner schedules.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{CoreError, Result};
use crate::id::ItemId;

/// Accepted layouts for date-time ready dates.
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%dT%H:%M:%S",
];

/// Accepted layouts for date-only ready dates.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d.%m.%Y"];

/// Production status of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// Waiting in the queue
    #[default]
    Pending,
    /// Partially produced
    InProgress,
    /// Finished; never scheduled
    Done,
}

impl ItemStatus {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::InProgress => "in progress",
            ItemStatus::Done => "done",
        }
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ItemStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "" | "pending" | "open" | "queued" => Ok(ItemStatus::Pending),
            "in progress" | "in_progress" | "inprogress" | "active" | "started" => {
                Ok(ItemStatus::InProgress)
            }
            "done" | "completed" | "finished" => Ok(ItemStatus::Done),
            _ => Err(CoreError::Parse {
                field: "status",
                value: s.to_string(),
            }),
        }
    }
}

/// Raw item record as exchanged with the item store.
///
/// Everything except the id is loosely typed: values come from hand-edited
/// sources and are interpreted by [`WorkItem::from_row`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRow {
    /// Item identifier
    pub id: ItemId,

    /// Ready date text (empty or absent = no ready date)
    #[serde(default)]
    pub ready_date: Option<String>,

    /// Remaining workload in area units, as a number or text
    #[serde(default)]
    pub remaining_workload: serde_json::Value,

    /// Status text
    #[serde(default)]
    pub status: String,

    /// Predicted completion date as written by the planner
    #[serde(default)]
    pub predicted_completion: Option<String>,
}

impl ItemRow {
    /// Create a pending row with a numeric workload.
    pub fn new(id: impl Into<ItemId>, remaining_workload: f64) -> Self {
        Self {
            id: id.into(),
            ready_date: None,
            remaining_workload: serde_json::json!(remaining_workload),
            status: ItemStatus::Pending.as_str().to_string(),
            predicted_completion: None,
        }
    }

    /// Set the ready date text.
    pub fn with_ready_date(mut self, text: impl Into<String>) -> Self {
        self.ready_date = Some(text.into());
        self
    }

    /// Set the status text.
    pub fn with_status(mut self, status: ItemStatus) -> Self {
        self.status = status.as_str().to_string();
        self
    }
}

/// A typed snapshot of one queued production item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Unique identifier
    pub id: ItemId,

    /// Earliest moment production may start (None = not gated)
    pub ready_date: Option<NaiveDateTime>,

    /// Area units still to produce
    pub remaining_workload: f64,

    /// Current status
    pub status: ItemStatus,

    /// Planner output
    pub predicted_completion: Option<NaiveDate>,
}

impl WorkItem {
    /// Create a pending item without a ready date.
    pub fn new(id: impl Into<ItemId>, remaining_workload: f64) -> Self {
        Self {
            id: id.into(),
            ready_date: None,
            remaining_workload,
            status: ItemStatus::Pending,
            predicted_completion: None,
        }
    }

    /// Gate the item on a ready timestamp.
    pub fn with_ready_date(mut self, ready: NaiveDateTime) -> Self {
        self.ready_date = Some(ready);
        self
    }

    /// Gate the item on the start of a ready day.
    pub fn with_ready_day(mut self, day: NaiveDate) -> Self {
        self.ready_date = Some(day.and_time(NaiveTime::MIN));
        self
    }

    /// Set the status.
    pub fn with_status(mut self, status: ItemStatus) -> Self {
        self.status = status;
        self
    }

    /// Workload the planner must allocate. Done items count as zero.
    pub fn effective_workload(&self) -> f64 {
        match self.status {
            ItemStatus::Done => 0.0,
            _ => self.remaining_workload,
        }
    }

    /// Interpret a raw row. Unreadable fields are logged and degraded:
    /// a bad ready date becomes "no gate", a bad workload becomes zero and
    /// an unknown status becomes pending.
    pub fn from_row(row: &ItemRow, date_format: &str) -> Self {
        let ready_date = match row.ready_date.as_deref().map(parse_ready_date) {
            None => None,
            Some(Ok(parsed)) => parsed,
            Some(Err(e)) => {
                warn!(item_id = %row.id, error = %e, "Ignoring unreadable ready date");
                None
            }
        };

        let remaining_workload = parse_workload(&row.remaining_workload).unwrap_or_else(|e| {
            warn!(item_id = %row.id, error = %e, "Treating unreadable workload as zero");
            0.0
        });

        let status = row.status.parse().unwrap_or_else(|e| {
            warn!(item_id = %row.id, error = %e, "Unknown status, treating as pending");
            ItemStatus::Pending
        });

        let predicted_completion = row
            .predicted_completion
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .and_then(|s| {
                NaiveDate::parse_from_str(s, date_format)
                    .ok()
                    .or_else(|| parse_date(s))
            });

        Self {
            id: row.id.clone(),
            ready_date,
            remaining_workload,
            status,
            predicted_completion,
        }
    }
}

/// Parse ready-date text. Empty text means "no ready date".
pub fn parse_ready_date(text: &str) -> Result<Option<NaiveDateTime>> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }

    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(Some(dt));
        }
    }

    parse_date(text)
        .map(|d| Some(d.and_time(NaiveTime::MIN)))
        .ok_or_else(|| CoreError::Parse {
            field: "ready_date",
            value: text.to_string(),
        })
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(text, format).ok())
}

/// Parse a workload value given as a number or as text (decimal comma allowed).
pub fn parse_workload(value: &serde_json::Value) -> Result<f64> {
    let parsed = match value {
        serde_json::Value::Null => Some(0.0),
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) if s.trim().is_empty() => Some(0.0),
        serde_json::Value::String(s) => s.trim().replace(',', ".").parse::<f64>().ok(),
        _ => None,
    };

    match parsed {
        Some(v) if v.is_finite() => Ok(v),
        _ => Err(CoreError::Parse {
            field: "remaining_workload",
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_parse_ready_date_formats() {
        let midnight = day(2026, 3, 9).and_time(NaiveTime::MIN);
        assert_eq!(parse_ready_date("2026-03-09").unwrap(), Some(midnight));
        assert_eq!(parse_ready_date("2026/03/09").unwrap(), Some(midnight));
        assert_eq!(parse_ready_date("09.03.2026").unwrap(), Some(midnight));
        assert_eq!(
            parse_ready_date("2026-03-09 10:30").unwrap(),
            Some(day(2026, 3, 9).and_hms_opt(10, 30, 0).unwrap())
        );
        assert_eq!(parse_ready_date("  ").unwrap(), None);
    }

    #[test]
    fn test_parse_ready_date_rejects_garbage() {
        let err = parse_ready_date("next tuesday").unwrap_err();
        assert!(matches!(err, CoreError::Parse { field: "ready_date", .. }));
    }

    #[test]
    fn test_parse_workload_variants() {
        assert_eq!(parse_workload(&serde_json::json!(12.5)).unwrap(), 12.5);
        assert_eq!(parse_workload(&serde_json::json!("12,5")).unwrap(), 12.5);
        assert_eq!(parse_workload(&serde_json::Value::Null).unwrap(), 0.0);
        assert!(parse_workload(&serde_json::json!("lots")).is_err());
        assert!(parse_workload(&serde_json::json!("NaN")).is_err());
        assert!(parse_workload(&serde_json::json!([1])).is_err());
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("Done".parse::<ItemStatus>().unwrap(), ItemStatus::Done);
        assert_eq!("in progress".parse::<ItemStatus>().unwrap(), ItemStatus::InProgress);
        assert_eq!("".parse::<ItemStatus>().unwrap(), ItemStatus::Pending);
        assert!("shipped?".parse::<ItemStatus>().is_err());
    }

    #[test]
    fn test_from_row_degrades_bad_fields() {
        let row = ItemRow {
            id: ItemId::from("A-1"),
            ready_date: Some("soon".to_string()),
            remaining_workload: serde_json::json!("n/a"),
            status: "weird".to_string(),
            predicted_completion: None,
        };

        let item = WorkItem::from_row(&row, "%d.%m.%Y");
        assert_eq!(item.ready_date, None);
        assert_eq!(item.remaining_workload, 0.0);
        assert_eq!(item.status, ItemStatus::Pending);
    }

    #[test]
    fn test_from_row_reads_prediction_in_output_format() {
        let mut row = ItemRow::new("A-2", 40.0).with_ready_date("2026-03-09");
        row.predicted_completion = Some("11.03.2026".to_string());

        let item = WorkItem::from_row(&row, "%d.%m.%Y");
        assert_eq!(item.remaining_workload, 40.0);
        assert_eq!(item.predicted_completion, Some(day(2026, 3, 11)));
    }

    #[test]
    fn test_done_items_have_zero_effective_workload() {
        let item = WorkItem::new("B", 50.0).with_status(ItemStatus::Done);
        assert_eq!(item.effective_workload(), 0.0);
        assert_eq!(WorkItem::new("C", 50.0).effective_workload(), 50.0);
    }
}
