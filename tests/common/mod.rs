#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::Notify;

use station_forecaster::domain::{ArtifactKey, ArtifactKind, ArtifactRef, Observation, Stage, Table};
use station_forecaster::lifecycle::ModelBuilder;
use station_forecaster::ml::{InputShape, ModelMetadata, ModelType, Regressor, Trainable};
use station_forecaster::registry::{ModelRegistry, RegistryError};

pub const TARGET: &str = "available_bike_stands";

/// Hourly table with a repeating 0..=9 target and a temperature column.
pub fn station_table(n: usize) -> Table {
    let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
    let rows = (0..n)
        .map(|i| Observation {
            timestamp: start + Duration::hours(i as i64),
            values: vec![(i % 10) as f64, 12.0 + (i % 7) as f64],
        })
        .collect();
    Table::new(vec![TARGET.to_string(), "temperature".to_string()], TARGET, rows).unwrap()
}

/// Regressor that always predicts the same scaled value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstantModel {
    pub metadata: ModelMetadata,
    pub value: f64,
}

impl Regressor for ConstantModel {
    fn predict(&self, x: &[Vec<f64>]) -> anyhow::Result<Vec<f64>> {
        Ok(vec![self.value; x.len()])
    }

    fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }
}

impl Trainable for ConstantModel {
    fn fit_batch(&mut self, _x: &[Vec<f64>], _y: &[f64], _learning_rate: f64) -> anyhow::Result<f64> {
        Ok(0.0)
    }

    fn finish_training(&mut self, training_samples: usize) {
        self.metadata.training_samples = training_samples;
    }
}

/// Builder whose next model predicts whatever value was last set.
pub fn constant_builder(value: Arc<Mutex<f64>>) -> ModelBuilder<ConstantModel> {
    Arc::new(move |shape: InputShape| ConstantModel {
        metadata: ModelMetadata {
            model_id: "constant".to_string(),
            model_type: ModelType::LinearRegression,
            input_shape: shape,
            trained_at: Utc::now(),
            training_samples: 0,
        },
        value: *value.lock(),
    })
}

/// Registry wrapper with switchable failures and a slow scaler promotion.
pub struct FlakyRegistry {
    inner: Arc<dyn ModelRegistry>,
    pub fail_scaler_promotion: AtomicBool,
    pub fail_lookups: AtomicBool,
    pub scaler_promotion_delay_ms: AtomicU64,
    /// Notified when a scaler transition to production begins.
    pub scaler_promotion_started: Notify,
}

impl FlakyRegistry {
    pub fn new(inner: Arc<dyn ModelRegistry>) -> Self {
        Self {
            inner,
            fail_scaler_promotion: AtomicBool::new(false),
            fail_lookups: AtomicBool::new(false),
            scaler_promotion_delay_ms: AtomicU64::new(0),
            scaler_promotion_started: Notify::new(),
        }
    }
}

#[async_trait]
impl ModelRegistry for FlakyRegistry {
    async fn get_latest_version(&self, key: &ArtifactKey, stage: Stage) -> Result<ArtifactRef, RegistryError> {
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(RegistryError::Io("connection reset".to_string()));
        }
        self.inner.get_latest_version(key, stage).await
    }

    async fn register(&self, key: &ArtifactKey, artifact: Vec<u8>, run_id: &str) -> Result<ArtifactRef, RegistryError> {
        self.inner.register(key, artifact, run_id).await
    }

    async fn transition_stage(&self, key: &ArtifactKey, version: u64, stage: Stage) -> Result<(), RegistryError> {
        if key.kind == ArtifactKind::Scaler && stage == Stage::Production {
            self.scaler_promotion_started.notify_one();
            let delay = self.scaler_promotion_delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                tokio::time::sleep(StdDuration::from_millis(delay)).await;
            }
            if self.fail_scaler_promotion.load(Ordering::SeqCst) {
                return Err(RegistryError::Io("scaler transition rejected".to_string()));
            }
        }
        self.inner.transition_stage(key, version, stage).await
    }

    async fn load_artifact(&self, artifact: &ArtifactRef) -> Result<Vec<u8>, RegistryError> {
        self.inner.load_artifact(artifact).await
    }

    async fn list_versions(&self, key: &ArtifactKey) -> Result<Vec<ArtifactRef>, RegistryError> {
        self.inner.list_versions(key).await
    }
}
