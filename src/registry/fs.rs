//! Filesystem registry for trained model artefacts.
//!
//! Layout per registered name:
//! `<root>/<name>/index.json` holds every version's `ArtifactRef`, and
//! `<root>/<name>/<version>/artifact.bin` holds the bytes. Index updates are
//! written to a temporary file and renamed into place.

use async_trait::async_trait;
use chrono::Utc;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::debug;

use super::{apply_transition, latest_at_stage, ModelRegistry, RegistryError};
use crate::domain::{ArtifactKey, ArtifactRef, Stage};

const INDEX_FILE: &str = "index.json";
const ARTIFACT_FILE: &str = "artifact.bin";

pub struct FsRegistry {
    root: PathBuf,
    prefix: String,
    write_lock: Mutex<()>,
}

impl FsRegistry {
    pub fn new(root: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            prefix: prefix.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn name_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn artifact_path(&self, name: &str, version: u64) -> PathBuf {
        self.name_dir(name).join(version.to_string()).join(ARTIFACT_FILE)
    }

    async fn read_index(&self, name: &str) -> Result<Vec<ArtifactRef>, RegistryError> {
        let path = self.name_dir(name).join(INDEX_FILE);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_index(&self, name: &str, versions: &[ArtifactRef]) -> Result<(), RegistryError> {
        let dir = self.name_dir(name);
        tokio::fs::create_dir_all(&dir).await?;
        let tmp = dir.join(format!("{}.tmp", INDEX_FILE));
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(versions)?).await?;
        tokio::fs::rename(&tmp, dir.join(INDEX_FILE)).await?;
        Ok(())
    }
}

#[async_trait]
impl ModelRegistry for FsRegistry {
    async fn get_latest_version(&self, key: &ArtifactKey, stage: Stage) -> Result<ArtifactRef, RegistryError> {
        let name = key.registry_name(&self.prefix);
        let versions = self.read_index(&name).await?;
        latest_at_stage(&name, &versions, stage)
    }

    async fn register(&self, key: &ArtifactKey, artifact: Vec<u8>, run_id: &str) -> Result<ArtifactRef, RegistryError> {
        let name = key.registry_name(&self.prefix);
        let _guard = self.write_lock.lock().await;

        let mut versions = self.read_index(&name).await?;
        let version = versions.iter().map(|v| v.version).max().unwrap_or(0) + 1;

        let path = self.artifact_path(&name, version);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &artifact).await?;

        let artifact_ref = ArtifactRef {
            source: format!("file://{}", path.display()),
            name: name.clone(),
            entity_id: key.entity_id,
            kind: key.kind,
            version,
            stage: Stage::Staging,
            run_id: run_id.to_string(),
            created_at: Utc::now(),
        };
        versions.push(artifact_ref.clone());
        self.write_index(&name, &versions).await?;

        debug!(name = %name, version, bytes = artifact.len(), "artifact registered");
        Ok(artifact_ref)
    }

    async fn transition_stage(&self, key: &ArtifactKey, version: u64, stage: Stage) -> Result<(), RegistryError> {
        let name = key.registry_name(&self.prefix);
        let _guard = self.write_lock.lock().await;

        let mut versions = self.read_index(&name).await?;
        apply_transition(&name, &mut versions, version, stage)?;
        self.write_index(&name, &versions).await
    }

    async fn load_artifact(&self, artifact: &ArtifactRef) -> Result<Vec<u8>, RegistryError> {
        let path = self.artifact_path(&artifact.name, artifact.version);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(RegistryError::VersionNotFound {
                name: artifact.name.clone(),
                version: artifact.version,
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_versions(&self, key: &ArtifactKey) -> Result<Vec<ArtifactRef>, RegistryError> {
        self.read_index(&key.registry_name(&self.prefix)).await
    }
}
