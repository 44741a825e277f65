//! CSV-backed dataset provider.
//!
//! Layout: `<root>/<station>/<split>.csv`, each file with a `date` column
//! (RFC 3339) followed by numeric feature columns.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io;
use std::path::{Path, PathBuf};

use super::DatasetProvider;
use crate::domain::{EntityId, Observation, Split, Table};
use crate::error::LifecycleError;

const DATE_COLUMN: &str = "date";

pub struct CsvDatasetProvider {
    root: PathBuf,
    target_column: String,
}

impl CsvDatasetProvider {
    pub fn new(root: impl Into<PathBuf>, target_column: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            target_column: target_column.into(),
        }
    }

    fn split_path(&self, entity: EntityId, split: Split) -> PathBuf {
        self.root
            .join(entity.to_string())
            .join(format!("{}.csv", split.as_ref()))
    }
}

/// Parse one split file's contents into a table.
pub fn parse_table(contents: &[u8], target_column: &str) -> anyhow::Result<Table> {
    let mut reader = csv::Reader::from_reader(contents);
    let headers = reader.headers()?.clone();

    let date_idx = headers
        .iter()
        .position(|h| h == DATE_COLUMN)
        .ok_or_else(|| anyhow::anyhow!("missing '{}' column", DATE_COLUMN))?;
    let columns: Vec<String> = headers
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != date_idx)
        .map(|(_, h)| h.to_string())
        .collect();

    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record?;
        let raw_date = record
            .get(date_idx)
            .ok_or_else(|| anyhow::anyhow!("row {}: missing date", line + 1))?;
        let timestamp = DateTime::parse_from_rfc3339(raw_date)
            .map_err(|e| anyhow::anyhow!("row {}: bad date '{}': {}", line + 1, raw_date, e))?
            .with_timezone(&Utc);

        let values = record
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != date_idx)
            .map(|(_, field)| {
                field
                    .trim()
                    .parse::<f64>()
                    .map_err(|e| anyhow::anyhow!("row {}: bad value '{}': {}", line + 1, field, e))
            })
            .collect::<anyhow::Result<Vec<f64>>>()?;

        rows.push(Observation { timestamp, values });
    }

    Table::new(columns, target_column, rows)
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}

#[async_trait]
impl DatasetProvider for CsvDatasetProvider {
    async fn find(&self, entity: EntityId, split: Split) -> Result<Option<Table>, LifecycleError> {
        let path = self.split_path(entity, split);
        let contents = match tokio::fs::read(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(LifecycleError::data(
                    entity,
                    format!("cannot read {}: {}", path.display(), e),
                ))
            }
        };

        parse_table(&contents, &self.target_column)
            .map(Some)
            .map_err(|e| LifecycleError::data(entity, format!("{}: {}", path.display(), e)))
    }

    async fn entities(&self) -> Result<Vec<EntityId>, LifecycleError> {
        let mut dir = tokio::fs::read_dir(&self.root).await.map_err(|e| {
            LifecycleError::NotFound(format!("dataset root {}: {}", self.root.display(), e))
        })?;

        let mut ids = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| LifecycleError::NotFound(e.to_string()))?
        {
            let Some(id) = entry.file_name().to_str().and_then(|n| n.parse::<u32>().ok()) else {
                continue;
            };
            if is_dir(&entry.path()).await {
                ids.push(EntityId(id));
            }
        }
        ids.sort();
        Ok(ids)
    }
}
