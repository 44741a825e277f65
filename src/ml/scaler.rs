//! Min-max feature scaler.
//!
//! Stateful while fitting, plain data at rest: the fitted column extrema are
//! serialised and registered next to the model trained on them.

use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MinMaxScaler {
    pub feature_range: (f64, f64),
    data_min: Option<Vec<f64>>,
    data_max: Option<Vec<f64>>,
}

impl Default for MinMaxScaler {
    fn default() -> Self {
        Self::new((0.0, 1.0))
    }
}

impl MinMaxScaler {
    pub fn new(feature_range: (f64, f64)) -> Self {
        Self {
            feature_range,
            data_min: None,
            data_max: None,
        }
    }

    pub fn is_fitted(&self) -> bool {
        self.data_min.is_some() && self.data_max.is_some()
    }

    pub fn n_features(&self) -> Option<usize> {
        self.data_min.as_ref().map(Vec::len)
    }

    /// Fitted per-column minima and maxima.
    pub fn params(&self) -> Option<(&[f64], &[f64])> {
        match (&self.data_min, &self.data_max) {
            (Some(min), Some(max)) => Some((min.as_slice(), max.as_slice())),
            _ => None,
        }
    }

    /// Learn per-column extrema from `rows`. Replaces any previous fit.
    pub fn fit(&mut self, rows: &[Vec<f64>]) -> Result<()> {
        let first = rows
            .first()
            .ok_or_else(|| anyhow::anyhow!("Cannot fit scaler on empty data"))?;
        let n = first.len();
        let mut min = vec![f64::INFINITY; n];
        let mut max = vec![f64::NEG_INFINITY; n];

        for row in rows {
            if row.len() != n {
                anyhow::bail!("All rows must have {} columns, got {}", n, row.len());
            }
            for (i, v) in row.iter().enumerate() {
                if !v.is_finite() {
                    anyhow::bail!("Non-finite value in column {}", i);
                }
                min[i] = min[i].min(*v);
                max[i] = max[i].max(*v);
            }
        }

        self.data_min = Some(min);
        self.data_max = Some(max);
        Ok(())
    }

    fn column_params(&self, column: usize) -> Result<(f64, f64)> {
        let (min, max) = self
            .params()
            .ok_or_else(|| anyhow::anyhow!("Scaler has not been fitted"))?;
        if column >= min.len() {
            anyhow::bail!("Column {} out of range for scaler with {} columns", column, min.len());
        }
        // Constant columns scale with unit range so they stay invertible.
        let range = max[column] - min[column];
        let range = if range.abs() < 1e-12 { 1.0 } else { range };
        Ok((min[column], range))
    }

    pub fn transform_value(&self, column: usize, value: f64) -> Result<f64> {
        let (min, range) = self.column_params(column)?;
        let (lo, hi) = self.feature_range;
        Ok((value - min) / range * (hi - lo) + lo)
    }

    pub fn inverse_transform_value(&self, column: usize, value: f64) -> Result<f64> {
        let (min, range) = self.column_params(column)?;
        let (lo, hi) = self.feature_range;
        Ok((value - lo) / (hi - lo) * range + min)
    }

    pub fn transform_row(&self, row: &[f64]) -> Result<Vec<f64>> {
        if Some(row.len()) != self.n_features() {
            anyhow::bail!(
                "Row has {} columns, scaler expects {:?}",
                row.len(),
                self.n_features()
            );
        }
        row.iter()
            .enumerate()
            .map(|(i, v)| self.transform_value(i, *v))
            .collect()
    }

    pub fn transform(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>> {
        rows.iter().map(|r| self.transform_row(r)).collect()
    }

    /// Inverse-scale a sequence of values belonging to one column.
    pub fn inverse_transform_column(&self, column: usize, values: &[f64]) -> Result<Vec<f64>> {
        values
            .iter()
            .map(|v| self.inverse_transform_value(column, *v))
            .collect()
    }
}
