//! Notifications exchanged between the item store and the planner.

use crate::id::{ItemId, RunId};
use crate::Time;
use serde::{Deserialize, Serialize};

/// Which part of an item changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemField {
    /// Ready date column
    ReadyDate,
    /// Remaining workload column
    Workload,
    /// Status column
    Status,
    /// Planner output column
    PredictedCompletion,
    /// Whole row inserted, removed or moved
    Row,
}

/// Who caused a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOrigin {
    /// Users, imports, other collaborators
    External,
    /// The planner writing its own output
    Scheduler,
}

/// A mutation observed in the item store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeNotification {
    /// Affected item (None = the whole store)
    pub item_id: Option<ItemId>,

    /// Affected field
    pub field: ItemField,

    /// Source of the change
    pub origin: ChangeOrigin,
}

impl ChangeNotification {
    /// An external change to one item field.
    pub fn external(item_id: impl Into<ItemId>, field: ItemField) -> Self {
        Self {
            item_id: Some(item_id.into()),
            field,
            origin: ChangeOrigin::External,
        }
    }

    /// An external change affecting the whole store (reload, reorder).
    pub fn store_reloaded() -> Self {
        Self {
            item_id: None,
            field: ItemField::Row,
            origin: ChangeOrigin::External,
        }
    }

    /// The planner's own write to an item's prediction.
    pub fn scheduler_write(item_id: ItemId) -> Self {
        Self {
            item_id: Some(item_id),
            field: ItemField::PredictedCompletion,
            origin: ChangeOrigin::Scheduler,
        }
    }

    /// Whether this change was produced by the planner itself.
    pub fn is_self_inflicted(&self) -> bool {
        self.origin == ChangeOrigin::Scheduler
    }
}

/// Sent once per finished run so presentation layers can refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchComplete {
    /// Run that produced the batch
    pub run_id: RunId,

    /// Number of items whose prediction was written
    pub items_written: usize,

    /// When the run finished
    pub finished_at: Time,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduler_writes_are_self_inflicted() {
        let note = ChangeNotification::scheduler_write(ItemId::from("X"));
        assert!(note.is_self_inflicted());
        assert_eq!(note.field, ItemField::PredictedCompletion);

        let note = ChangeNotification::external("X", ItemField::Workload);
        assert!(!note.is_self_inflicted());
        assert!(!ChangeNotification::store_reloaded().is_self_inflicted());
    }
}
