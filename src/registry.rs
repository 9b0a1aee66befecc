use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use crate::catalog::Dataset;
use crate::database::DatabaseManager;
use crate::error::EngineError;

/// Process-wide list of known datasets.
///
/// Reads are cheap clones of a snapshot; the only writer is `refresh`, which
/// reloads from the catalog store and swaps the list atomically. Request
/// handlers never mutate it directly.
#[derive(Clone)]
pub struct DatasetRegistry {
    datasets: Arc<RwLock<Vec<Dataset>>>,
}

impl DatasetRegistry {
    pub fn new() -> Self {
        Self {
            datasets: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub async fn refresh(&self, db: &DatabaseManager) -> Result<usize, EngineError> {
        let datasets = db.list_dataset_metadata().await?;
        let count = datasets.len();
        *self.datasets.write().await = datasets;
        info!(dataset_count = count, "Refreshed dataset registry");
        Ok(count)
    }

    pub async fn snapshot(&self) -> Vec<Dataset> {
        self.datasets.read().await.clone()
    }

    pub async fn find_by_id(&self, dataset_id: i32) -> Option<Dataset> {
        self.datasets
            .read()
            .await
            .iter()
            .find(|d| d.id == dataset_id)
            .cloned()
    }

    pub async fn is_empty(&self) -> bool {
        self.datasets.read().await.is_empty()
    }
}

impl Default for DatasetRegistry {
    fn default() -> Self {
        Self::new()
    }
}
