//! ML Model Training Pipeline
//!
//! Fits a freshly built regressor on prepared look-back windows. Persistence
//! is left to the caller.

use super::{InputShape, Trainable};
use crate::data::PreparedData;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Training Configuration. Fixed for all stations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub verbose: bool,
    pub learning_rate: f64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 10,
            batch_size: 32,
            verbose: false,
            learning_rate: 0.05,
        }
    }
}

/// A fitted model and its predictions on the held-out test windows.
#[derive(Debug, Clone)]
pub struct TrainedModel<M> {
    pub model: M,
    pub test_predictions: Vec<f64>,
    pub final_loss: f64,
}

/// Model Trainer
pub struct ModelTrainer {
    config: TrainingConfig,
}

impl ModelTrainer {
    pub fn new(config: TrainingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Build a model for the data's input shape and fit it.
    ///
    /// Batches are visited in chronological order every epoch, so the same
    /// data and configuration always produce the same model.
    pub fn train<M, F>(&self, data: &PreparedData, build: F) -> Result<TrainedModel<M>>
    where
        M: Trainable,
        F: FnOnce(InputShape) -> M,
    {
        if data.x_train.is_empty() {
            anyhow::bail!("Cannot train on empty dataset");
        }
        if data.x_train.len() != data.y_train.len() || data.x_test.len() != data.y_test.len() {
            anyhow::bail!(
                "Feature and target count mismatch: train {}/{}, test {}/{}",
                data.x_train.len(),
                data.y_train.len(),
                data.x_test.len(),
                data.y_test.len()
            );
        }
        if self.config.epochs == 0 || self.config.batch_size == 0 {
            anyhow::bail!("epochs and batch_size must be positive");
        }

        let mut model = build(data.shape);
        if model.input_shape() != data.shape {
            anyhow::bail!(
                "Built model expects {:?}, data has {:?}",
                model.input_shape(),
                data.shape
            );
        }

        let mut final_loss = 0.0;
        for epoch in 0..self.config.epochs {
            let mut epoch_loss = 0.0;
            let mut batches = 0usize;
            for (x, y) in data
                .x_train
                .chunks(self.config.batch_size)
                .zip(data.y_train.chunks(self.config.batch_size))
            {
                epoch_loss += model.fit_batch(x, y, self.config.learning_rate)?;
                batches += 1;
            }
            final_loss = epoch_loss / batches.max(1) as f64;

            if self.config.verbose {
                let val_loss = mean_squared(&model.predict(&data.x_test)?, &data.y_test);
                debug!(epoch = epoch + 1, loss = final_loss, val_loss, "epoch finished");
            }
        }

        model.finish_training(data.x_train.len());
        let test_predictions = model.predict(&data.x_test)?;

        Ok(TrainedModel {
            model,
            test_predictions,
            final_loss,
        })
    }
}

fn mean_squared(predictions: &[f64], targets: &[f64]) -> f64 {
    if predictions.is_empty() {
        return 0.0;
    }
    predictions
        .iter()
        .zip(targets.iter())
        .map(|(p, t)| (p - t).powi(2))
        .sum::<f64>()
        / predictions.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::{build_model, Regressor};

    fn prepared(shape: InputShape) -> PreparedData {
        // Target is the mean of the window's single feature.
        let xs: Vec<Vec<f64>> = (0..40)
            .map(|i| (0..shape.width()).map(|j| ((i + j) % 10) as f64 / 10.0).collect())
            .collect();
        let ys: Vec<f64> = xs.iter().map(|r| r.iter().sum::<f64>() / r.len() as f64).collect();
        PreparedData {
            shape,
            x_train: xs[..30].to_vec(),
            y_train: ys[..30].to_vec(),
            x_test: xs[30..].to_vec(),
            y_test: ys[30..].to_vec(),
        }
    }

    #[test]
    fn test_train_returns_test_predictions() {
        let shape = InputShape { lookback: 3, n_features: 1 };
        let data = prepared(shape);
        let trainer = ModelTrainer::new(TrainingConfig {
            epochs: 200,
            batch_size: 8,
            verbose: true,
            learning_rate: 0.1,
        });

        let trained = trainer.train(&data, build_model).unwrap();
        assert_eq!(trained.test_predictions.len(), data.y_test.len());
        assert_eq!(trained.model.metadata().training_samples, 30);
        assert!(mean_squared(&trained.test_predictions, &data.y_test) < 0.01);
    }

    #[test]
    fn test_training_is_deterministic() {
        let shape = InputShape { lookback: 2, n_features: 1 };
        let data = prepared(shape);
        let trainer = ModelTrainer::new(TrainingConfig::default());

        let a = trainer.train(&data, build_model).unwrap();
        let b = trainer.train(&data, build_model).unwrap();
        assert_eq!(a.model.coefficients, b.model.coefficients);
        assert_eq!(a.test_predictions, b.test_predictions);
    }

    #[test]
    fn test_rejects_empty_training_set() {
        let shape = InputShape { lookback: 1, n_features: 1 };
        let data = PreparedData {
            shape,
            x_train: vec![],
            y_train: vec![],
            x_test: vec![],
            y_test: vec![],
        };
        let trainer = ModelTrainer::new(TrainingConfig::default());
        assert!(trainer.train(&data, build_model).is_err());
    }

    #[test]
    fn test_rejects_mismatched_builder() {
        let data = prepared(InputShape { lookback: 2, n_features: 1 });
        let trainer = ModelTrainer::new(TrainingConfig::default());
        let result = trainer.train(&data, |_| {
            build_model(InputShape { lookback: 5, n_features: 1 })
        });
        assert!(result.is_err());
    }
}
