//! JSON file storage implementation.
//!
//! Stores the queue as `items.json` (an array of rows in queue order) and the
//! production history as `history.json` inside a data directory. An optional
//! `config.json` next to them holds the planner configuration.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use lineplan_core::{ChangeNotification, DailyOutput, ItemField, ItemId, ItemRow, PlannerConfig};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, trace};

use super::trait_::{apply_predictions, upsert_output, upsert_row, NOTIFICATION_BUFFER};
use super::{Result, Storage};

const ITEMS_FILE: &str = "items.json";
const HISTORY_FILE: &str = "history.json";
const CONFIG_FILE: &str = "config.json";

/// Contents of `history.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct HistoryFile {
    long_run_average: Option<f64>,
    days: Vec<DailyOutput>,
}

/// File-based JSON storage backend.
pub struct JsonStorage {
    root: PathBuf,
    // Serializes read-modify-write cycles on the files.
    write_lock: Mutex<()>,
    changes: broadcast::Sender<ChangeNotification>,
}

impl JsonStorage {
    /// Open a data directory, creating it when missing.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;

        let (changes, _) = broadcast::channel(NOTIFICATION_BUFFER);
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
            changes,
        })
    }

    /// Data directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Load `config.json`, or defaults when the file does not exist.
    pub async fn load_config(&self) -> Result<PlannerConfig> {
        let config: PlannerConfig = read_json(&self.root.join(CONFIG_FILE))
            .await?
            .unwrap_or_default();
        config.validate()?;
        Ok(config)
    }

    /// Write `config.json`.
    pub async fn save_config(&self, config: &PlannerConfig) -> Result<()> {
        config.validate()?;
        write_json(&self.root.join(CONFIG_FILE), config).await
    }

    /// Set the persisted long-run average.
    pub async fn set_long_run_average(&self, value: Option<f64>) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut history = self.read_history().await?;
        history.long_run_average = value;
        write_json(&self.root.join(HISTORY_FILE), &history).await
    }

    async fn read_items(&self) -> Result<Vec<ItemRow>> {
        Ok(read_json(&self.root.join(ITEMS_FILE)).await?.unwrap_or_default())
    }

    async fn write_items(&self, rows: &[ItemRow]) -> Result<()> {
        write_json(&self.root.join(ITEMS_FILE), &rows).await
    }

    async fn read_history(&self) -> Result<HistoryFile> {
        Ok(read_json(&self.root.join(HISTORY_FILE)).await?.unwrap_or_default())
    }

    fn announce(&self, note: ChangeNotification) {
        if self.changes.send(note).is_err() {
            trace!("Change notification dropped, no subscribers");
        }
    }
}

#[async_trait]
impl Storage for JsonStorage {
    async fn list_items(&self) -> Result<Vec<ItemRow>> {
        self.read_items().await
    }

    async fn save_item(&self, row: ItemRow) -> Result<()> {
        let id = row.id.clone();
        let inserted = {
            let _guard = self.write_lock.lock().await;
            let mut rows = self.read_items().await?;
            let inserted = upsert_row(&mut rows, row);
            self.write_items(&rows).await?;
            inserted
        };
        let field = if inserted { ItemField::Row } else { ItemField::Workload };
        self.announce(ChangeNotification::external(id, field));
        Ok(())
    }

    async fn remove_item(&self, id: &ItemId) -> Result<bool> {
        let removed = {
            let _guard = self.write_lock.lock().await;
            let mut rows = self.read_items().await?;
            let before = rows.len();
            rows.retain(|r| &r.id != id);
            let removed = rows.len() < before;
            if removed {
                self.write_items(&rows).await?;
            }
            removed
        };
        if removed {
            self.announce(ChangeNotification::external(id.clone(), ItemField::Row));
        }
        Ok(removed)
    }

    async fn write_predictions(&self, predictions: &[(ItemId, Option<String>)]) -> Result<usize> {
        let changed = {
            let _guard = self.write_lock.lock().await;
            let mut rows = self.read_items().await?;
            let changed = apply_predictions(&mut rows, predictions);
            if !changed.is_empty() {
                self.write_items(&rows).await?;
            }
            changed
        };
        debug!(count = changed.len(), path = %self.root.display(), "Predictions written");

        let count = changed.len();
        for id in changed {
            self.announce(ChangeNotification::scheduler_write(id));
        }
        Ok(count)
    }

    async fn completion_history(&self) -> Result<Vec<DailyOutput>> {
        let mut days = self.read_history().await?.days;
        days.sort_by(|a, b| a.date.cmp(&b.date));
        Ok(days)
    }

    async fn record_output(&self, output: DailyOutput) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut history = self.read_history().await?;
        history.days.sort_by(|a, b| a.date.cmp(&b.date));
        upsert_output(&mut history.days, output);
        write_json(&self.root.join(HISTORY_FILE), &history).await
    }

    async fn long_run_average(&self) -> Result<Option<f64>> {
        Ok(self.read_history().await?.long_run_average)
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeNotification> {
        self.changes.subscribe()
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read_to_string(path).await {
        Ok(json) => {
            let value = serde_json::from_str(&json)?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json.as_bytes()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_items_roundtrip_through_files() {
        let dir = TempDir::new().unwrap();
        let storage = JsonStorage::new(dir.path()).await.unwrap();

        storage.save_item(ItemRow::new("a", 10.0)).await.unwrap();
        storage.save_item(ItemRow::new("b", 20.0).with_ready_date("2026-03-09")).await.unwrap();

        let reopened = JsonStorage::new(dir.path()).await.unwrap();
        let rows = reopened.list_items().await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].ready_date.as_deref(), Some("2026-03-09"));
    }

    #[tokio::test]
    async fn test_missing_files_mean_empty_store() {
        let dir = TempDir::new().unwrap();
        let storage = JsonStorage::new(dir.path().join("nested")).await.unwrap();

        assert!(storage.list_items().await.unwrap().is_empty());
        assert!(storage.completion_history().await.unwrap().is_empty());
        assert_eq!(storage.long_run_average().await.unwrap(), None);
        assert_eq!(storage.load_config().await.unwrap(), PlannerConfig::default());
    }

    #[tokio::test]
    async fn test_write_predictions_persists_and_notifies() {
        let dir = TempDir::new().unwrap();
        let storage = JsonStorage::new(dir.path()).await.unwrap();
        storage.save_item(ItemRow::new("a", 10.0)).await.unwrap();
        let mut rx = storage.subscribe();

        let written = storage
            .write_predictions(&[(ItemId::from("a"), Some("10.03.2026".to_string()))])
            .await
            .unwrap();

        assert_eq!(written, 1);
        assert!(rx.recv().await.unwrap().is_self_inflicted());
        let rows = storage.list_items().await.unwrap();
        assert_eq!(rows[0].predicted_completion.as_deref(), Some("10.03.2026"));
    }

    #[tokio::test]
    async fn test_history_and_long_run_average() {
        let dir = TempDir::new().unwrap();
        let storage = JsonStorage::new(dir.path()).await.unwrap();
        let day = |d| NaiveDate::from_ymd_opt(2026, 3, d).unwrap();

        storage.record_output(DailyOutput::new(day(5), 70.0)).await.unwrap();
        storage.record_output(DailyOutput::new(day(3), 90.0)).await.unwrap();
        storage.set_long_run_average(Some(75.0)).await.unwrap();

        let history = storage.completion_history().await.unwrap();
        assert_eq!(history[0].date, day(3));
        assert_eq!(storage.long_run_average().await.unwrap(), Some(75.0));
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let dir = TempDir::new().unwrap();
        let storage = JsonStorage::new(dir.path()).await.unwrap();
        std::fs::write(
            dir.path().join("config.json"),
            r#"{ "calendar": { "work_start": "15:00", "work_end": "07:00" } }"#,
        )
        .unwrap();

        assert!(storage.load_config().await.is_err());
    }
}
