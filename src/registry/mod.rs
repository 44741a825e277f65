//! Versioned model registry.
//!
//! The registry is an opaque store mapping `(name, version)` to artifact
//! bytes plus a lifecycle stage. `PairStore` layers the model/scaler coupling
//! on top of it.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{ArtifactKey, ArtifactRef, Stage};

pub mod fs;
pub mod memory;
pub mod pair;
pub mod timed;

pub use fs::FsRegistry;
pub use memory::InMemoryRegistry;
pub use pair::{LoadedPair, PairStore, ReconcileOutcome};
pub use timed::TimedRegistry;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no version of {name} at stage {stage}")]
    NotFound { name: String, stage: Stage },

    #[error("{name} has no version {version}")]
    VersionNotFound { name: String, version: u64 },

    #[error("registry I/O error: {0}")]
    Io(String),

    #[error("registry call {operation} timed out after {seconds}s")]
    Timeout { operation: &'static str, seconds: u64 },

    #[error("artifact codec error: {0}")]
    Codec(String),
}

impl From<std::io::Error> for RegistryError {
    fn from(error: std::io::Error) -> Self {
        RegistryError::Io(error.to_string())
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(error: serde_json::Error) -> Self {
        RegistryError::Codec(error.to_string())
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ModelRegistry: Send + Sync {
    /// Highest version of `key` currently at `stage`.
    async fn get_latest_version(&self, key: &ArtifactKey, stage: Stage) -> Result<ArtifactRef, RegistryError>;

    /// Store a new version. New versions start at `Staging`.
    async fn register(&self, key: &ArtifactKey, artifact: Vec<u8>, run_id: &str) -> Result<ArtifactRef, RegistryError>;

    /// Move a version to `stage`. Moving to `Production` archives the
    /// previous production version of the same key.
    async fn transition_stage(&self, key: &ArtifactKey, version: u64, stage: Stage) -> Result<(), RegistryError>;

    async fn load_artifact(&self, artifact: &ArtifactRef) -> Result<Vec<u8>, RegistryError>;

    /// All versions of `key`, oldest first.
    async fn list_versions(&self, key: &ArtifactKey) -> Result<Vec<ArtifactRef>, RegistryError>;
}

/// Apply a stage transition to an in-memory version list, keeping at most
/// one `Production` entry.
pub(crate) fn apply_transition(
    name: &str,
    versions: &mut [ArtifactRef],
    version: u64,
    stage: Stage,
) -> Result<(), RegistryError> {
    if !versions.iter().any(|v| v.version == version) {
        return Err(RegistryError::VersionNotFound {
            name: name.to_string(),
            version,
        });
    }

    for v in versions.iter_mut() {
        if v.version == version {
            v.stage = stage;
        } else if stage == Stage::Production && v.stage == Stage::Production {
            v.stage = Stage::Archived;
        }
    }
    Ok(())
}

pub(crate) fn latest_at_stage(name: &str, versions: &[ArtifactRef], stage: Stage) -> Result<ArtifactRef, RegistryError> {
    versions
        .iter()
        .filter(|v| v.stage == stage)
        .max_by_key(|v| v.version)
        .cloned()
        .ok_or_else(|| RegistryError::NotFound {
            name: name.to_string(),
            stage,
        })
}
