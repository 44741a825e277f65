//! Model evaluation in physical units.
//!
//! Predictions and ground truth are inverse-scaled through the scaler used to
//! produce them before any metric is computed, so metrics are comparable
//! across stations and across scaler versions.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::MinMaxScaler;
use crate::domain::Table;

/// (MSE, MAE, explained variance), in the target's original units.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MetricTriple {
    pub mse: f64,
    pub mae: f64,
    pub evs: f64,
}

impl MetricTriple {
    /// Compute the triple from unscaled values.
    pub fn calculate(actual: &[f64], predicted: &[f64]) -> Result<Self> {
        if actual.len() != predicted.len() {
            anyhow::bail!(
                "Prediction and target count mismatch: {} targets, {} predictions",
                actual.len(),
                predicted.len()
            );
        }
        if actual.is_empty() {
            anyhow::bail!("No predictions to evaluate");
        }

        let n = actual.len() as f64;
        let errors: Vec<f64> = actual.iter().zip(predicted).map(|(a, p)| a - p).collect();

        let mse = errors.iter().map(|e| e * e).sum::<f64>() / n;
        let mae = errors.iter().map(|e| e.abs()).sum::<f64>() / n;

        // Explained variance: 1 - Var(y - y_hat) / Var(y)
        let var_actual = variance(actual);
        let var_error = variance(&errors);
        let evs = if var_actual.abs() < 1e-12 {
            if var_error.abs() < 1e-12 { 1.0 } else { 0.0 }
        } else {
            1.0 - var_error / var_actual
        };

        Ok(Self { mse, mae, evs })
    }

    /// Strictly better on the promotion metric. Ties favour the incumbent.
    pub fn beats(&self, incumbent: &MetricTriple) -> bool {
        self.mse < incumbent.mse
    }
}

fn variance(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n
}

/// Inverse-scale scaled targets and predictions through `scaler` and compute
/// the metric triple. `dataset` identifies the target column.
pub fn evaluate_model_performance(
    y_true: &[f64],
    y_pred: &[f64],
    dataset: &Table,
    scaler: &MinMaxScaler,
) -> Result<MetricTriple> {
    let column = dataset.target;
    let actual = scaler.inverse_transform_column(column, y_true)?;
    let predicted = scaler.inverse_transform_column(column, y_pred)?;
    MetricTriple::calculate(&actual, &predicted)
}
