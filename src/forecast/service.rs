use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use super::{ForecastError, ForecastPoint, MultiStepForecaster};
use crate::config::ServingConfig;
use crate::data::DatasetProvider;
use crate::domain::{EntityId, ModelScalerPair, Stage};
use crate::error::LifecycleError;
use crate::ml::PersistableModel;
use crate::registry::{LoadedPair, PairStore};

/// A forecast together with the pair that produced it.
#[derive(Debug, Clone, Serialize)]
pub struct Forecast {
    pub entity_id: EntityId,
    pub model_version: u64,
    pub scaler_version: u64,
    pub run_id: String,
    pub points: Vec<ForecastPoint>,
}

/// Serves forecasts from each station's production pair.
///
/// Loaded pairs are cached per station and replaced as soon as the registry
/// reports a different production version.
pub struct ForecastService<M> {
    pairs: PairStore,
    provider: Arc<dyn DatasetProvider>,
    forecaster: MultiStepForecaster,
    min_entity_id: u32,
    max_entity_id: u32,
    cache: RwLock<HashMap<EntityId, Arc<LoadedPair<M>>>>,
}

impl<M: PersistableModel> ForecastService<M> {
    pub fn new(pairs: PairStore, provider: Arc<dyn DatasetProvider>, serving: &ServingConfig) -> Self {
        Self {
            pairs,
            provider,
            forecaster: MultiStepForecaster::new(serving.max_horizon),
            min_entity_id: serving.min_entity_id,
            max_entity_id: serving.max_entity_id,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Check request bounds before anything touches the registry.
    pub fn validate(&self, entity: i64, horizon: i64) -> Result<(EntityId, usize), ForecastError> {
        let horizon = self.forecaster.check_horizon(horizon)?;
        Ok((self.check_entity(entity)?, horizon))
    }

    pub async fn predict_multiple(&self, entity: i64, horizon: i64) -> Result<Forecast, ForecastError> {
        let (entity, horizon) = self.validate(entity, horizon)?;

        let loaded = match self.pairs.latest_pair(entity, Stage::Production).await {
            Ok(Some(pair)) => self.loaded(&pair).await?,
            Ok(None) => return Err(ForecastError::NotAvailable(entity)),
            // A promotion in flight: one half has moved, the other not yet.
            Err(LifecycleError::PairMismatch(reason)) => match self.cached(entity) {
                Some(cached) => {
                    debug!(entity_id = %entity, reason = %reason, "production pair in transition, serving cached pair");
                    cached
                }
                None => return Err(LifecycleError::PairMismatch(reason).into()),
            },
            Err(e) => return Err(e.into()),
        };
        let pair = &loaded.pair;
        let history = self.provider.history(entity).await?;

        let points = self
            .forecaster
            .forecast(entity, &loaded.model, &loaded.scaler, &history, horizon)?;
        debug!(entity_id = %entity, horizon, model_version = pair.model.version, "forecast served");

        Ok(Forecast {
            entity_id: entity,
            model_version: pair.model.version,
            scaler_version: pair.scaler.version,
            run_id: pair.run_id().to_string(),
            points,
        })
    }

    /// Current production pair refs for `entity`, if any.
    pub async fn production_pair(&self, entity: i64) -> Result<ModelScalerPair, ForecastError> {
        let entity = self.check_entity(entity)?;
        self.pairs
            .latest_pair(entity, Stage::Production)
            .await?
            .ok_or(ForecastError::NotAvailable(entity))
    }

    pub fn check_entity(&self, entity: i64) -> Result<EntityId, ForecastError> {
        if entity < self.min_entity_id as i64 || entity > self.max_entity_id as i64 {
            return Err(ForecastError::InvalidEntity {
                entity,
                min: self.min_entity_id,
                max: self.max_entity_id,
            });
        }
        Ok(EntityId(entity as u32))
    }

    fn cached(&self, entity: EntityId) -> Option<Arc<LoadedPair<M>>> {
        self.cache.read().get(&entity).cloned()
    }

    async fn loaded(&self, pair: &ModelScalerPair) -> Result<Arc<LoadedPair<M>>, ForecastError> {
        if let Some(cached) = self.cached(pair.entity_id).filter(|c| c.pair == *pair) {
            return Ok(cached);
        }

        let loaded = Arc::new(self.pairs.load::<M>(pair).await?);
        self.cache.write().insert(pair.entity_id, loaded.clone());
        info!(
            entity_id = %pair.entity_id,
            model_version = pair.model.version,
            scaler_version = pair.scaler.version,
            "production pair loaded"
        );
        Ok(loaded)
    }
}
