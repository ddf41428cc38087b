//! Throughput statistics pulled at the start of each planning run.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use lineplan_core::{DailyOutput, WorkItem};
use lineplan_storage::{Result, Storage};

/// Statistics for one planning run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThroughputStats {
    /// Production history, oldest first
    pub history: Vec<DailyOutput>,
    /// Persisted long-run average, if any
    pub long_run_average: Option<f64>,
    /// Sum of effective remaining workload over the queue
    pub total_remaining: f64,
}

/// Source of throughput statistics.
#[async_trait]
pub trait StatisticsProvider: Send + Sync {
    /// Pull fresh statistics for a queue snapshot.
    async fn refresh(&self, items: &[WorkItem], today: NaiveDate) -> Result<ThroughputStats>;
}

/// Statistics read from the item store.
pub struct StoreStatistics<S: Storage + ?Sized> {
    storage: Arc<S>,
}

impl<S: Storage + ?Sized> StoreStatistics<S> {
    /// Create a provider over a store.
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl<S: Storage + ?Sized + 'static> StatisticsProvider for StoreStatistics<S> {
    async fn refresh(&self, items: &[WorkItem], today: NaiveDate) -> Result<ThroughputStats> {
        let history = self
            .storage
            .completion_history()
            .await?
            .into_iter()
            .filter(|o| o.date <= today)
            .collect();
        let long_run_average = self.storage.long_run_average().await?;

        Ok(ThroughputStats {
            history,
            long_run_average,
            total_remaining: total_remaining(items),
        })
    }
}

/// Sum of effective remaining workload; negative values count as zero.
pub fn total_remaining(items: &[WorkItem]) -> f64 {
    items
        .iter()
        .map(|i| i.effective_workload())
        .filter(|w| w.is_finite() && *w > 0.0)
        .sum()
}
