//! Storage trait abstraction.

use async_trait::async_trait;
use lineplan_core::{ChangeNotification, CoreError, DailyOutput, ItemId, ItemRow};
use tokio::sync::broadcast;

/// Error type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Stored configuration is invalid
    #[error("config error: {0}")]
    Config(#[from] CoreError),

    /// Item not found
    #[error("Not found: {0}")]
    NotFound(String),
}

/// Capacity of the change notification channel.
pub const NOTIFICATION_BUFFER: usize = 256;

/// The item store the planner reads from and writes predictions into.
///
/// Items are kept in queue order. Every mutation is announced on the
/// change stream returned by [`Storage::subscribe`]; writes made through
/// [`Storage::write_predictions`] are tagged as scheduler-originated.
#[async_trait]
pub trait Storage: Send + Sync {
    // === Item operations ===

    /// List all items in queue order.
    async fn list_items(&self) -> Result<Vec<ItemRow>>;

    /// Insert an item at the end of the queue, or replace it in place.
    async fn save_item(&self, row: ItemRow) -> Result<()>;

    /// Remove an item. Returns whether it existed.
    async fn remove_item(&self, id: &ItemId) -> Result<bool>;

    /// Write predicted completion texts in one batch.
    ///
    /// Returns the number of items whose stored value actually changed.
    /// Unknown ids are skipped.
    async fn write_predictions(&self, predictions: &[(ItemId, Option<String>)]) -> Result<usize>;

    // === Statistics ===

    /// Completed area per production day, oldest first.
    async fn completion_history(&self) -> Result<Vec<DailyOutput>>;

    /// Append or replace the record for one production day.
    async fn record_output(&self, output: DailyOutput) -> Result<()>;

    /// Persisted long-run average of daily output, if one is maintained.
    async fn long_run_average(&self) -> Result<Option<f64>>;

    // === Notifications ===

    /// Subscribe to item mutations.
    fn subscribe(&self) -> broadcast::Receiver<ChangeNotification>;
}

/// Apply a batch of predictions to rows, returning the ids that changed.
pub(crate) fn apply_predictions(
    rows: &mut [ItemRow],
    predictions: &[(ItemId, Option<String>)],
) -> Vec<ItemId> {
    let mut changed = Vec::new();
    for (id, value) in predictions {
        let Some(row) = rows.iter_mut().find(|r| &r.id == id) else {
            continue;
        };
        if row.predicted_completion != *value {
            row.predicted_completion = value.clone();
            changed.push(id.clone());
        }
    }
    changed
}

/// Insert or replace a row, returning true when it was new.
pub(crate) fn upsert_row(rows: &mut Vec<ItemRow>, row: ItemRow) -> bool {
    match rows.iter_mut().find(|r| r.id == row.id) {
        Some(existing) => {
            *existing = row;
            false
        }
        None => {
            rows.push(row);
            true
        }
    }
}

/// Insert or replace the record for a day, keeping history sorted.
pub(crate) fn upsert_output(history: &mut Vec<DailyOutput>, output: DailyOutput) {
    match history.binary_search_by(|o| o.date.cmp(&output.date)) {
        Ok(pos) => history[pos] = output,
        Err(pos) => history.insert(pos, output),
    }
}
