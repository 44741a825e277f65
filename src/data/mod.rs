//! Station datasets: loading, window splitting and model input preparation.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::domain::{EntityId, Split, Table};
use crate::error::LifecycleError;

pub mod csv;
pub mod prepare;
pub mod split;

pub use self::csv::CsvDatasetProvider;
pub use prepare::{create_sequences, evaluation_sequences, prepare_model_data, EvaluationSequences, PreparedData};
pub use split::{split_table, WindowPair, WindowSplitter};

/// Source of time-ordered feature tables, keyed by station and split name.
#[async_trait]
pub trait DatasetProvider: Send + Sync {
    /// Look up one split. `None` means nothing is stored for it; unreadable
    /// or malformed data is a `Data` error.
    async fn find(&self, entity: EntityId, split: Split) -> Result<Option<Table>, LifecycleError>;

    /// Load one split. A station or split with no stored data is a `Data` error.
    async fn load(&self, entity: EntityId, split: Split) -> Result<Table, LifecycleError> {
        self.find(entity, split)
            .await?
            .ok_or_else(|| LifecycleError::data(entity, format!("no {} data", split)))
    }

    /// Stations with stored data, in ascending order.
    async fn entities(&self) -> Result<Vec<EntityId>, LifecycleError>;

    /// Full stored history: the train split followed by the newer test rows.
    async fn history(&self, entity: EntityId) -> Result<Table, LifecycleError> {
        let mut history = self.load(entity, Split::Train).await?;
        if let Some(test) = self.find(entity, Split::Test).await? {
            history
                .extend_with_newer(test)
                .map_err(|e| LifecycleError::data(entity, e.to_string()))?;
        }
        if history.is_empty() {
            return Err(LifecycleError::data(entity, "no stored history"));
        }
        Ok(history)
    }
}

/// In-process dataset provider, used by tests and the in-memory deployment.
#[derive(Default)]
pub struct InMemoryDatasetProvider {
    tables: RwLock<HashMap<(EntityId, Split), Table>>,
}

impl InMemoryDatasetProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, entity: EntityId, split: Split, table: Table) {
        self.tables.write().insert((entity, split), table);
    }

    pub fn remove(&self, entity: EntityId, split: Split) -> Option<Table> {
        self.tables.write().remove(&(entity, split))
    }
}

#[async_trait]
impl DatasetProvider for InMemoryDatasetProvider {
    async fn find(&self, entity: EntityId, split: Split) -> Result<Option<Table>, LifecycleError> {
        Ok(self.tables.read().get(&(entity, split)).cloned())
    }

    async fn entities(&self) -> Result<Vec<EntityId>, LifecycleError> {
        let mut ids: Vec<EntityId> = self.tables.read().keys().map(|(e, _)| *e).collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }
}
