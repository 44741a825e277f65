use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::EntityId;
use crate::error::LifecycleError;

/// Lifecycle stage of a registered artifact version.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Stage {
    /// Candidate under evaluation
    Staging,
    /// Currently serving
    Production,
    /// Superseded production version, kept for history
    Archived,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ArtifactKind {
    Model,
    Scaler,
}

/// Typed registry key. The only place where registry names are formatted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArtifactKey {
    pub entity_id: EntityId,
    pub kind: ArtifactKind,
}

impl ArtifactKey {
    pub fn model(entity_id: EntityId) -> Self {
        Self {
            entity_id,
            kind: ArtifactKind::Model,
        }
    }

    pub fn scaler(entity_id: EntityId) -> Self {
        Self {
            entity_id,
            kind: ArtifactKind::Scaler,
        }
    }

    /// `<prefix>_<entity_id>` for models, `<prefix>_<entity_id>_scaler` for scalers.
    pub fn registry_name(&self, prefix: &str) -> String {
        match self.kind {
            ArtifactKind::Model => format!("{}_{}", prefix, self.entity_id),
            ArtifactKind::Scaler => format!("{}_{}_scaler", prefix, self.entity_id),
        }
    }

    /// The other half of the model/scaler pair for the same station.
    pub fn counterpart(&self) -> Self {
        match self.kind {
            ArtifactKind::Model => Self::scaler(self.entity_id),
            ArtifactKind::Scaler => Self::model(self.entity_id),
        }
    }
}

/// A registered artifact version. Only `stage` changes after registration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArtifactRef {
    pub name: String,
    pub entity_id: EntityId,
    pub kind: ArtifactKind,
    pub version: u64,
    pub stage: Stage,
    pub source: String,
    pub run_id: String,
    pub created_at: DateTime<Utc>,
}

impl ArtifactRef {
    pub fn key(&self) -> ArtifactKey {
        ArtifactKey {
            entity_id: self.entity_id,
            kind: self.kind,
        }
    }
}

/// A model and the scaler it was trained with. Registered, loaded and
/// promoted as one unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelScalerPair {
    pub entity_id: EntityId,
    pub model: ArtifactRef,
    pub scaler: ArtifactRef,
}

impl ModelScalerPair {
    pub fn new(model: ArtifactRef, scaler: ArtifactRef) -> Result<Self, LifecycleError> {
        if model.kind != ArtifactKind::Model || scaler.kind != ArtifactKind::Scaler {
            return Err(LifecycleError::PairMismatch(format!(
                "expected (model, scaler), got ({}, {})",
                model.kind, scaler.kind
            )));
        }
        if model.entity_id != scaler.entity_id {
            return Err(LifecycleError::PairMismatch(format!(
                "model {} belongs to station {}, scaler {} to station {}",
                model.name, model.entity_id, scaler.name, scaler.entity_id
            )));
        }
        if model.run_id != scaler.run_id {
            return Err(LifecycleError::PairMismatch(format!(
                "{} v{} (run {}) and {} v{} (run {}) come from different runs",
                model.name, model.version, model.run_id, scaler.name, scaler.version, scaler.run_id
            )));
        }
        Ok(Self {
            entity_id: model.entity_id,
            model,
            scaler,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.model.run_id
    }
}
