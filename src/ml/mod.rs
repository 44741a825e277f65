//! Machine Learning Module
//!
//! Black-box regressor contracts plus the pieces that surround them in a
//! training run:
//! - Feature scaling (`scaler`)
//! - Look-back sequence preparation and training (`training`)
//! - Metric evaluation in physical units (`evaluation`)
//! - A concrete windowed linear regressor (`models`)

use anyhow::Result;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

pub mod evaluation;
pub mod models;
pub mod scaler;
pub mod training;

pub use evaluation::{evaluate_model_performance, MetricTriple};
pub use models::{build_model, LinearRegressionModel};
pub use scaler::MinMaxScaler;
pub use training::{ModelTrainer, TrainedModel, TrainingConfig};

/// ML Model Type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ModelType {
    LinearRegression,
}

/// Shape of one model input: `lookback` consecutive rows of `n_features` columns.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct InputShape {
    pub lookback: usize,
    pub n_features: usize,
}

impl InputShape {
    /// Length of the flattened input vector.
    pub fn width(&self) -> usize {
        self.lookback * self.n_features
    }
}

/// ML Model Metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub model_id: String,
    pub model_type: ModelType,
    pub input_shape: InputShape,
    pub trained_at: chrono::DateTime<chrono::Utc>,
    pub training_samples: usize,
}

/// Trait for fitted regressors.
///
/// `predict` must not mutate the model: one loaded instance is shared by
/// concurrent serving requests.
pub trait Regressor: Send + Sync {
    /// Predict one scaled target per flattened input window
    fn predict(&self, x: &[Vec<f64>]) -> Result<Vec<f64>>;

    /// Get model metadata
    fn metadata(&self) -> &ModelMetadata;

    fn input_shape(&self) -> InputShape {
        self.metadata().input_shape
    }
}

/// A regressor that can be fit incrementally by mini-batches.
pub trait Trainable: Regressor {
    /// Run one optimisation step on a batch and return its mean squared loss.
    fn fit_batch(&mut self, x: &[Vec<f64>], y: &[f64], learning_rate: f64) -> Result<f64>;

    /// Record bookkeeping once training finishes.
    fn finish_training(&mut self, training_samples: usize);
}

/// Models that can be stored in the registry as bytes.
pub trait PersistableModel: Trainable + Serialize + DeserializeOwned + 'static {}

impl<T> PersistableModel for T where T: Trainable + Serialize + DeserializeOwned + 'static {}

/// Encode a model or scaler for the registry.
pub fn encode_artifact<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

/// Decode a model or scaler fetched from the registry.
pub fn decode_artifact<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(bytes)?)
}
