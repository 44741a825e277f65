//! Metric persistence for lifecycle cycles.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;

use super::PromotionDecision;
use crate::domain::EntityId;
use crate::ml::MetricTriple;

/// Metrics of one evaluated cycle. Written once, never updated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsRecord {
    pub entity_id: EntityId,
    pub run_id: String,
    pub recorded_at: DateTime<Utc>,
    pub candidate: MetricTriple,
    pub production: Option<MetricTriple>,
    pub decision: PromotionDecision,
}

#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn record(&self, record: &MetricsRecord) -> Result<()>;
}

/// Appends one JSON line per record to `<dir>/station_<id>/metrics.jsonl`.
pub struct FileMetricsSink {
    dir: PathBuf,
}

impl FileMetricsSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, entity: EntityId) -> PathBuf {
        self.dir.join(format!("station_{}", entity)).join("metrics.jsonl")
    }
}

#[async_trait]
impl MetricsSink for FileMetricsSink {
    async fn record(&self, record: &MetricsRecord) -> Result<()> {
        let path = self.path_for(record.entity_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryMetricsSink {
    records: Mutex<Vec<MetricsRecord>>,
}

impl InMemoryMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<MetricsRecord> {
        self.records.lock().clone()
    }

    pub fn records_for(&self, entity: EntityId) -> Vec<MetricsRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.entity_id == entity)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl MetricsSink for InMemoryMetricsSink {
    async fn record(&self, record: &MetricsRecord) -> Result<()> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(entity: u32, mse: f64) -> MetricsRecord {
        MetricsRecord {
            entity_id: EntityId(entity),
            run_id: "run".to_string(),
            recorded_at: Utc::now(),
            candidate: MetricTriple { mse, mae: 1.0, evs: 0.5 },
            production: None,
            decision: PromotionDecision::ColdStart,
        }
    }

    #[tokio::test]
    async fn test_file_sink_appends_json_lines() {
        let dir = std::env::temp_dir().join(format!("sf-reports-{}", uuid::Uuid::new_v4()));
        let sink = FileMetricsSink::new(&dir);

        sink.record(&record(4, 2.0)).await.unwrap();
        sink.record(&record(4, 1.0)).await.unwrap();

        let contents = tokio::fs::read_to_string(dir.join("station_4").join("metrics.jsonl"))
            .await
            .unwrap();
        let parsed: Vec<MetricsRecord> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].candidate.mse, 1.0);

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn test_in_memory_sink_filters_by_entity() {
        let sink = InMemoryMetricsSink::new();
        sink.record(&record(1, 1.0)).await.unwrap();
        sink.record(&record(2, 1.0)).await.unwrap();
        assert_eq!(sink.records().len(), 2);
        assert_eq!(sink.records_for(EntityId(2)).len(), 1);
    }
}
