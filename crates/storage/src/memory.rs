//! In-process item store.

use async_trait::async_trait;
use lineplan_core::{ChangeNotification, DailyOutput, ItemField, ItemId, ItemRow};
use tokio::sync::{broadcast, RwLock};
use tracing::trace;

use super::trait_::{apply_predictions, upsert_output, upsert_row, NOTIFICATION_BUFFER};
use super::{Result, Storage};

/// Item store kept entirely in memory.
pub struct MemoryStorage {
    items: RwLock<Vec<ItemRow>>,
    history: RwLock<Vec<DailyOutput>>,
    long_run_average: RwLock<Option<f64>>,
    changes: broadcast::Sender<ChangeNotification>,
}

impl MemoryStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::with_items(Vec::new())
    }

    /// Create a store pre-filled with rows (no notifications are sent).
    pub fn with_items(rows: Vec<ItemRow>) -> Self {
        let (changes, _) = broadcast::channel(NOTIFICATION_BUFFER);
        Self {
            items: RwLock::new(rows),
            history: RwLock::new(Vec::new()),
            long_run_average: RwLock::new(None),
            changes,
        }
    }

    /// Set the long-run average fallback.
    pub async fn set_long_run_average(&self, value: Option<f64>) {
        *self.long_run_average.write().await = value;
    }

    fn announce(&self, note: ChangeNotification) {
        // No receivers is fine: nobody is watching yet.
        if self.changes.send(note).is_err() {
            trace!("Change notification dropped, no subscribers");
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn list_items(&self) -> Result<Vec<ItemRow>> {
        Ok(self.items.read().await.clone())
    }

    async fn save_item(&self, row: ItemRow) -> Result<()> {
        let id = row.id.clone();
        let inserted = upsert_row(&mut *self.items.write().await, row);
        let field = if inserted { ItemField::Row } else { ItemField::Workload };
        self.announce(ChangeNotification::external(id, field));
        Ok(())
    }

    async fn remove_item(&self, id: &ItemId) -> Result<bool> {
        let removed = {
            let mut items = self.items.write().await;
            let before = items.len();
            items.retain(|r| &r.id != id);
            items.len() < before
        };
        if removed {
            self.announce(ChangeNotification::external(id.clone(), ItemField::Row));
        }
        Ok(removed)
    }

    async fn write_predictions(&self, predictions: &[(ItemId, Option<String>)]) -> Result<usize> {
        let changed = apply_predictions(&mut self.items.write().await, predictions);
        let count = changed.len();
        for id in changed {
            self.announce(ChangeNotification::scheduler_write(id));
        }
        Ok(count)
    }

    async fn completion_history(&self) -> Result<Vec<DailyOutput>> {
        Ok(self.history.read().await.clone())
    }

    async fn record_output(&self, output: DailyOutput) -> Result<()> {
        upsert_output(&mut *self.history.write().await, output);
        Ok(())
    }

    async fn long_run_average(&self) -> Result<Option<f64>> {
        Ok(*self.long_run_average.read().await)
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeNotification> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lineplan_core::ChangeOrigin;

    #[tokio::test]
    async fn test_save_and_list_preserves_queue_order() {
        let storage = MemoryStorage::new();
        storage.save_item(ItemRow::new("first", 10.0)).await.unwrap();
        storage.save_item(ItemRow::new("second", 20.0)).await.unwrap();
        storage.save_item(ItemRow::new("first", 15.0)).await.unwrap();

        let rows = storage.list_items().await.unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second"]);
        assert_eq!(rows[0].remaining_workload, serde_json::json!(15.0));
    }

    #[tokio::test]
    async fn test_external_and_scheduler_writes_are_tagged() {
        let storage = MemoryStorage::with_items(vec![ItemRow::new("a", 10.0)]);
        let mut rx = storage.subscribe();

        storage.save_item(ItemRow::new("a", 12.0)).await.unwrap();
        let note = rx.recv().await.unwrap();
        assert_eq!(note.origin, ChangeOrigin::External);

        let written = storage
            .write_predictions(&[(ItemId::from("a"), Some("03.03.2026".to_string()))])
            .await
            .unwrap();
        assert_eq!(written, 1);
        let note = rx.recv().await.unwrap();
        assert_eq!(note.origin, ChangeOrigin::Scheduler);
    }

    #[tokio::test]
    async fn test_unchanged_predictions_are_silent() {
        let storage = MemoryStorage::with_items(vec![ItemRow::new("a", 10.0)]);
        let mut rx = storage.subscribe();

        let batch = [(ItemId::from("a"), None)];
        assert_eq!(storage.write_predictions(&batch).await.unwrap(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_remove_item() {
        let storage = MemoryStorage::with_items(vec![ItemRow::new("a", 10.0)]);
        assert!(storage.remove_item(&ItemId::from("a")).await.unwrap());
        assert!(!storage.remove_item(&ItemId::from("a")).await.unwrap());
        assert!(storage.list_items().await.unwrap().is_empty());
    }
}
