//! Model/scaler pair operations.
//!
//! Every registration, lookup, load and promotion of a station's artifacts
//! goes through `PairStore`, which never moves a model without its scaler.

use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Instrument};

use super::{ModelRegistry, RegistryError};
use crate::domain::{ArtifactKey, ArtifactRef, EntityId, ModelScalerPair, Stage};
use crate::error::LifecycleError;
use crate::ml::{decode_artifact, encode_artifact, MinMaxScaler};

const RETRY_DELAY: Duration = Duration::from_millis(100);

/// A decoded production (or candidate) pair ready for prediction.
#[derive(Debug)]
pub struct LoadedPair<M> {
    pub pair: ModelScalerPair,
    pub model: M,
    pub scaler: MinMaxScaler,
}

/// Result of checking that a station's production model and scaler match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// No production artifacts at all
    Empty,
    /// Production model and scaler come from the same run
    Consistent,
    /// A half-promoted pair was completed or reverted
    Repaired,
}

#[derive(Clone)]
pub struct PairStore {
    registry: Arc<dyn ModelRegistry>,
    promote_retries: u32,
}

impl PairStore {
    pub fn new(registry: Arc<dyn ModelRegistry>, promote_retries: u32) -> Self {
        Self {
            registry,
            promote_retries,
        }
    }

    pub fn registry(&self) -> &Arc<dyn ModelRegistry> {
        &self.registry
    }

    /// Register a model and its scaler as new `Staging` versions under one run.
    pub async fn register_pair<M: Serialize>(
        &self,
        entity: EntityId,
        model: &M,
        scaler: &MinMaxScaler,
        run_id: &str,
    ) -> Result<ModelScalerPair, LifecycleError> {
        let model_bytes = encode_artifact(model).map_err(|e| LifecycleError::Artifact(e.to_string()))?;
        let scaler_bytes = encode_artifact(scaler).map_err(|e| LifecycleError::Artifact(e.to_string()))?;

        let model_ref = self
            .registry
            .register(&ArtifactKey::model(entity), model_bytes, run_id)
            .await?;
        let scaler_ref = self
            .registry
            .register(&ArtifactKey::scaler(entity), scaler_bytes, run_id)
            .await?;

        ModelScalerPair::new(model_ref, scaler_ref)
    }

    async fn latest(&self, key: ArtifactKey, stage: Stage) -> Result<Option<ArtifactRef>, LifecycleError> {
        match self.registry.get_latest_version(&key, stage).await {
            Ok(found) => Ok(Some(found)),
            Err(RegistryError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// The station's pair at `stage`, or `None` when either half is missing.
    /// Registry failures are errors, not `None`.
    pub async fn latest_pair(&self, entity: EntityId, stage: Stage) -> Result<Option<ModelScalerPair>, LifecycleError> {
        let model = self.latest(ArtifactKey::model(entity), stage).await?;
        let scaler = self.latest(ArtifactKey::scaler(entity), stage).await?;
        match (model, scaler) {
            (Some(model), Some(scaler)) => ModelScalerPair::new(model, scaler).map(Some),
            _ => Ok(None),
        }
    }

    pub async fn load<M: DeserializeOwned>(&self, pair: &ModelScalerPair) -> Result<LoadedPair<M>, LifecycleError> {
        let model_bytes = self.registry.load_artifact(&pair.model).await?;
        let scaler_bytes = self.registry.load_artifact(&pair.scaler).await?;

        let model = decode_artifact(&model_bytes)
            .map_err(|e| LifecycleError::Artifact(format!("{} v{}: {}", pair.model.name, pair.model.version, e)))?;
        let scaler = decode_artifact(&scaler_bytes)
            .map_err(|e| LifecycleError::Artifact(format!("{} v{}: {}", pair.scaler.name, pair.scaler.version, e)))?;

        Ok(LoadedPair {
            pair: pair.clone(),
            model,
            scaler,
        })
    }

    /// Promote model and scaler to `Production` as one unit.
    ///
    /// The transitions run on their own task: dropping the returned future
    /// does not stop them, so a cancelled caller never leaves a model in
    /// production without its scaler. The scaler transition is retried; if it
    /// still fails the model transition is rolled back so the previous
    /// production pair keeps serving.
    pub async fn promote(&self, pair: &ModelScalerPair) -> Result<(), LifecycleError> {
        let store = self.clone();
        let pair = pair.clone();
        tokio::spawn(async move { store.transition_pair(&pair).await }.in_current_span())
            .await
            .map_err(|e| LifecycleError::RegistryIo(format!("promotion task failed: {e}")))?
    }

    async fn transition_pair(&self, pair: &ModelScalerPair) -> Result<(), LifecycleError> {
        let model_key = pair.model.key();
        let scaler_key = pair.scaler.key();
        let previous_model = self.latest(model_key, Stage::Production).await?;

        self.registry
            .transition_stage(&model_key, pair.model.version, Stage::Production)
            .await?;

        let mut attempt = 0;
        loop {
            match self
                .registry
                .transition_stage(&scaler_key, pair.scaler.version, Stage::Production)
                .await
            {
                Ok(()) => break,
                Err(e) if attempt < self.promote_retries => {
                    attempt += 1;
                    warn!(
                        entity_id = %pair.entity_id,
                        attempt,
                        error = %e,
                        "scaler promotion failed, retrying"
                    );
                    tokio::time::sleep(RETRY_DELAY * attempt).await;
                }
                Err(e) => {
                    self.rollback_model(pair, previous_model.as_ref()).await;
                    return Err(LifecycleError::RegistryIo(format!(
                        "promotion of {} v{} rolled back, scaler {} v{} could not be promoted: {}",
                        pair.model.name, pair.model.version, pair.scaler.name, pair.scaler.version, e
                    )));
                }
            }
        }

        info!(
            entity_id = %pair.entity_id,
            model_version = pair.model.version,
            scaler_version = pair.scaler.version,
            run_id = %pair.run_id(),
            "pair promoted to production"
        );
        Ok(())
    }

    async fn rollback_model(&self, pair: &ModelScalerPair, previous: Option<&ArtifactRef>) {
        let key = pair.model.key();
        if let Some(previous) = previous {
            if let Err(e) = self
                .registry
                .transition_stage(&key, previous.version, Stage::Production)
                .await
            {
                error!(entity_id = %pair.entity_id, error = %e, "failed to restore previous production model");
            }
        }
        if let Err(e) = self
            .registry
            .transition_stage(&key, pair.model.version, Stage::Staging)
            .await
        {
            error!(entity_id = %pair.entity_id, error = %e, "failed to return candidate model to staging");
        }
    }

    /// Repair a pair left half-promoted by an interrupted promotion.
    ///
    /// The production model wins when its scaler still exists; otherwise the
    /// model that matches the production scaler is restored.
    pub async fn reconcile(&self, entity: EntityId) -> Result<ReconcileOutcome, LifecycleError> {
        let model_key = ArtifactKey::model(entity);
        let scaler_key = model_key.counterpart();
        let model = self.latest(model_key, Stage::Production).await?;
        let scaler = self.latest(scaler_key, Stage::Production).await?;

        match (&model, &scaler) {
            (None, None) => return Ok(ReconcileOutcome::Empty),
            (Some(m), Some(s)) if m.run_id == s.run_id => return Ok(ReconcileOutcome::Consistent),
            _ => {}
        }

        warn!(
            entity_id = %entity,
            model_run = model.as_ref().map(|m| m.run_id.as_str()),
            scaler_run = scaler.as_ref().map(|s| s.run_id.as_str()),
            "production pair out of sync, reconciling"
        );

        if let Some(model) = &model {
            if let Some(partner) = self.find_by_run(scaler_key, &model.run_id).await? {
                self.registry
                    .transition_stage(&scaler_key, partner.version, Stage::Production)
                    .await?;
                return Ok(ReconcileOutcome::Repaired);
            }
        }
        if let Some(scaler) = &scaler {
            if let Some(partner) = self.find_by_run(model_key, &scaler.run_id).await? {
                self.registry
                    .transition_stage(&model_key, partner.version, Stage::Production)
                    .await?;
                return Ok(ReconcileOutcome::Repaired);
            }
        }

        Err(LifecycleError::PairMismatch(format!(
            "station {} has no matching model/scaler versions to restore",
            entity
        )))
    }

    async fn find_by_run(&self, key: ArtifactKey, run_id: &str) -> Result<Option<ArtifactRef>, LifecycleError> {
        Ok(self
            .registry
            .list_versions(&key)
            .await?
            .into_iter()
            .filter(|v| v.run_id == run_id)
            .max_by_key(|v| v.version))
    }
}
