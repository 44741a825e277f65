use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::ForecastError;
use crate::domain::{EntityId, Table};
use crate::ml::{MinMaxScaler, Regressor};

/// One forecast step in the target's physical units.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ForecastPoint {
    pub step: usize,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Recursive forecaster: every prediction is fed back as the target column
/// of the next input row. Other columns carry the last observed values forward.
#[derive(Debug, Clone, Copy)]
pub struct MultiStepForecaster {
    max_horizon: usize,
}

impl MultiStepForecaster {
    pub fn new(max_horizon: usize) -> Self {
        Self { max_horizon }
    }

    pub fn check_horizon(&self, horizon: i64) -> Result<usize, ForecastError> {
        if horizon < 1 || horizon > self.max_horizon as i64 {
            return Err(ForecastError::InvalidHorizon {
                horizon,
                max: self.max_horizon,
            });
        }
        Ok(horizon as usize)
    }

    pub fn forecast<R: Regressor + ?Sized>(
        &self,
        entity: EntityId,
        model: &R,
        scaler: &MinMaxScaler,
        history: &Table,
        horizon: usize,
    ) -> Result<Vec<ForecastPoint>, ForecastError> {
        let horizon = self.check_horizon(horizon as i64)?;
        let shape = model.input_shape();
        if history.len() < shape.lookback {
            return Err(ForecastError::InsufficientHistory {
                entity_id: entity,
                needed: shape.lookback,
                available: history.len(),
            });
        }
        if history.n_features() != shape.n_features {
            return Err(ForecastError::Model(format!(
                "model expects {} features, history has {}",
                shape.n_features,
                history.n_features()
            )));
        }

        let window = history.tail(shape.lookback);
        let mut rows: VecDeque<Vec<f64>> = scaler
            .transform(&window.feature_matrix())
            .map_err(|e| ForecastError::Model(format!("{e:#}")))?
            .into();

        let interval = history.sampling_interval();
        let mut timestamp = history
            .last_timestamp()
            .ok_or(ForecastError::InsufficientHistory {
                entity_id: entity,
                needed: shape.lookback.max(1),
                available: 0,
            })?;

        let mut points = Vec::with_capacity(horizon);
        for step in 1..=horizon {
            let input: Vec<f64> = rows.iter().flatten().copied().collect();
            let scaled = model
                .predict(&[input])
                .map_err(|e| ForecastError::Model(format!("{e:#}")))?
                .first()
                .copied()
                .ok_or_else(|| ForecastError::Model("model returned no prediction".to_string()))?;
            let value = scaler
                .inverse_transform_value(history.target, scaled)
                .map_err(|e| ForecastError::Model(format!("{e:#}")))?;

            timestamp += interval;
            points.push(ForecastPoint { step, timestamp, value });

            if let Some(mut next) = rows.back().cloned() {
                next[history.target] = scaled;
                rows.pop_front();
                rows.push_back(next);
            }
        }
        Ok(points)
    }
}
