//! ML Model Definitions
//!
//! The default forecasting architecture: a linear regressor over the
//! flattened look-back window, trained by mini-batch gradient descent.

use super::{InputShape, ModelMetadata, ModelType, Regressor, Trainable};
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Linear Regression over a flattened look-back window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearRegressionModel {
    pub metadata: ModelMetadata,
    pub coefficients: Vec<f64>,
    pub intercept: f64,
}

/// Architecture factory handed to the trainer. Station-agnostic.
pub fn build_model(shape: InputShape) -> LinearRegressionModel {
    LinearRegressionModel::new(vec![0.0; shape.width()], 0.0, shape)
}

impl LinearRegressionModel {
    pub fn new(coefficients: Vec<f64>, intercept: f64, input_shape: InputShape) -> Self {
        let metadata = ModelMetadata {
            model_id: format!("linear_regression_{}", uuid::Uuid::new_v4()),
            model_type: ModelType::LinearRegression,
            input_shape,
            trained_at: chrono::Utc::now(),
            training_samples: 0,
        };

        Self {
            metadata,
            coefficients,
            intercept,
        }
    }

    fn predict_one(&self, features: &[f64]) -> Result<f64> {
        if features.len() != self.coefficients.len() {
            anyhow::bail!(
                "Feature count mismatch: expected {}, got {}",
                self.coefficients.len(),
                features.len()
            );
        }

        Ok(features
            .iter()
            .zip(self.coefficients.iter())
            .map(|(f, c)| f * c)
            .sum::<f64>()
            + self.intercept)
    }
}

impl Regressor for LinearRegressionModel {
    fn predict(&self, x: &[Vec<f64>]) -> Result<Vec<f64>> {
        x.iter().map(|row| self.predict_one(row)).collect()
    }

    fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }
}

impl Trainable for LinearRegressionModel {
    fn fit_batch(&mut self, x: &[Vec<f64>], y: &[f64], learning_rate: f64) -> Result<f64> {
        if x.len() != y.len() {
            anyhow::bail!("Feature and target count mismatch: {} vs {}", x.len(), y.len());
        }
        if x.is_empty() {
            return Ok(0.0);
        }

        let n = x.len() as f64;
        let mut coef_gradients = vec![0.0; self.coefficients.len()];
        let mut intercept_gradient = 0.0;
        let mut loss = 0.0;

        for (features, target) in x.iter().zip(y.iter()) {
            let error = self.predict_one(features)? - target;
            loss += error * error / n;

            for (g, f) in coef_gradients.iter_mut().zip(features.iter()) {
                *g += error * f / n;
            }
            intercept_gradient += error / n;
        }

        for (c, g) in self.coefficients.iter_mut().zip(coef_gradients.iter()) {
            *c -= learning_rate * g;
        }
        self.intercept -= learning_rate * intercept_gradient;

        Ok(loss)
    }

    fn finish_training(&mut self, training_samples: usize) {
        self.metadata.trained_at = chrono::Utc::now();
        self.metadata.training_samples = training_samples;
    }
}
