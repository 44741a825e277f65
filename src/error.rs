//! Error taxonomy shared by the lifecycle engine and its adapters.

use thiserror::Error;

use crate::domain::EntityId;
use crate::registry::RegistryError;

/// Errors raised while training, evaluating or promoting a station's models.
///
/// `RegistryIo` must never be folded into `NotFound`: a failed lookup that is
/// read as "no baseline" would trigger a spurious cold-start promotion.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("data error for station {entity_id}: {reason}")]
    Data { entity_id: EntityId, reason: String },

    #[error("registry I/O failure: {0}")]
    RegistryIo(String),

    #[error("training failed: {0}")]
    Training(String),

    #[error("model/scaler pair mismatch: {0}")]
    PairMismatch(String),

    #[error("artifact could not be decoded: {0}")]
    Artifact(String),
}

impl LifecycleError {
    pub fn data(entity_id: EntityId, reason: impl Into<String>) -> Self {
        LifecycleError::Data {
            entity_id,
            reason: reason.into(),
        }
    }

    pub fn training(error: anyhow::Error) -> Self {
        LifecycleError::Training(format!("{error:#}"))
    }
}

impl From<RegistryError> for LifecycleError {
    fn from(error: RegistryError) -> Self {
        match error {
            RegistryError::NotFound { .. } | RegistryError::VersionNotFound { .. } => {
                LifecycleError::NotFound(error.to_string())
            }
            RegistryError::Codec(_) => LifecycleError::Artifact(error.to_string()),
            RegistryError::Io(_) | RegistryError::Timeout { .. } => {
                LifecycleError::RegistryIo(error.to_string())
            }
        }
    }
}
