//! Multi-step forecasting from a station's production pair.

pub mod multistep;
pub mod service;

pub use multistep::{ForecastPoint, MultiStepForecaster};
pub use service::{Forecast, ForecastService};

use thiserror::Error;

use crate::domain::EntityId;
use crate::error::LifecycleError;

#[derive(Debug, Error)]
pub enum ForecastError {
    #[error("model for station {0} is not available yet")]
    NotAvailable(EntityId),

    #[error("{}", horizon_message(*horizon, *max))]
    InvalidHorizon { horizon: i64, max: usize },

    #[error("station must be between {min} and {max}, got {entity}")]
    InvalidEntity { entity: i64, min: u32, max: u32 },

    #[error("station {entity_id} has {available} rows of history, the model needs {needed}")]
    InsufficientHistory {
        entity_id: EntityId,
        needed: usize,
        available: usize,
    },

    #[error("model error: {0}")]
    Model(String),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

impl ForecastError {
    /// Request parameters out of bounds.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ForecastError::InvalidHorizon { .. } | ForecastError::InvalidEntity { .. }
        )
    }
}

fn horizon_message(horizon: i64, max: usize) -> String {
    if horizon < 1 {
        "horizon must be greater than 0".to_string()
    } else {
        format!("horizon must be less than {}", max + 1)
    }
}
