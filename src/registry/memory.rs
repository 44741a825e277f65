use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;

use super::{apply_transition, latest_at_stage, ModelRegistry, RegistryError};
use crate::domain::{ArtifactKey, ArtifactRef, Stage};

struct Entry {
    versions: Vec<ArtifactRef>,
    blobs: HashMap<u64, Vec<u8>>,
}

/// Process-local registry. Used by tests and single-node deployments.
pub struct InMemoryRegistry {
    prefix: String,
    entries: RwLock<HashMap<String, Entry>>,
}

impl InMemoryRegistry {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn name(&self, key: &ArtifactKey) -> String {
        key.registry_name(&self.prefix)
    }
}

#[async_trait]
impl ModelRegistry for InMemoryRegistry {
    async fn get_latest_version(&self, key: &ArtifactKey, stage: Stage) -> Result<ArtifactRef, RegistryError> {
        let name = self.name(key);
        let entries = self.entries.read();
        let versions = entries.get(&name).map(|e| e.versions.as_slice()).unwrap_or(&[]);
        latest_at_stage(&name, versions, stage)
    }

    async fn register(&self, key: &ArtifactKey, artifact: Vec<u8>, run_id: &str) -> Result<ArtifactRef, RegistryError> {
        let name = self.name(key);
        let mut entries = self.entries.write();
        let entry = entries.entry(name.clone()).or_insert_with(|| Entry {
            versions: Vec::new(),
            blobs: HashMap::new(),
        });

        let version = entry.versions.iter().map(|v| v.version).max().unwrap_or(0) + 1;
        let artifact_ref = ArtifactRef {
            source: format!("memory://{}/{}", name, version),
            name,
            entity_id: key.entity_id,
            kind: key.kind,
            version,
            stage: Stage::Staging,
            run_id: run_id.to_string(),
            created_at: Utc::now(),
        };
        entry.versions.push(artifact_ref.clone());
        entry.blobs.insert(version, artifact);
        Ok(artifact_ref)
    }

    async fn transition_stage(&self, key: &ArtifactKey, version: u64, stage: Stage) -> Result<(), RegistryError> {
        let name = self.name(key);
        let mut entries = self.entries.write();
        match entries.get_mut(&name) {
            Some(entry) => apply_transition(&name, &mut entry.versions, version, stage),
            None => Err(RegistryError::VersionNotFound { name, version }),
        }
    }

    async fn load_artifact(&self, artifact: &ArtifactRef) -> Result<Vec<u8>, RegistryError> {
        self.entries
            .read()
            .get(&artifact.name)
            .and_then(|e| e.blobs.get(&artifact.version))
            .cloned()
            .ok_or_else(|| RegistryError::VersionNotFound {
                name: artifact.name.clone(),
                version: artifact.version,
            })
    }

    async fn list_versions(&self, key: &ArtifactKey) -> Result<Vec<ArtifactRef>, RegistryError> {
        Ok(self
            .entries
            .read()
            .get(&self.name(key))
            .map(|e| e.versions.clone())
            .unwrap_or_default())
    }
}
