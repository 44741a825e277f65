use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::{ModelRegistry, RegistryError};
use crate::domain::{ArtifactKey, ArtifactRef, Stage};

/// Bounds every registry call by a timeout. An elapsed timeout is reported as
/// `RegistryError::Timeout`, never as a missing version.
pub struct TimedRegistry {
    inner: Arc<dyn ModelRegistry>,
    timeout: Duration,
}

impl TimedRegistry {
    pub fn new(inner: Arc<dyn ModelRegistry>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn bounded<T, F>(&self, operation: &'static str, call: F) -> Result<T, RegistryError>
    where
        F: Future<Output = Result<T, RegistryError>>,
    {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| RegistryError::Timeout {
                operation,
                seconds: self.timeout.as_secs(),
            })?
    }
}

#[async_trait]
impl ModelRegistry for TimedRegistry {
    async fn get_latest_version(&self, key: &ArtifactKey, stage: Stage) -> Result<ArtifactRef, RegistryError> {
        self.bounded("get_latest_version", self.inner.get_latest_version(key, stage))
            .await
    }

    async fn register(&self, key: &ArtifactKey, artifact: Vec<u8>, run_id: &str) -> Result<ArtifactRef, RegistryError> {
        self.bounded("register", self.inner.register(key, artifact, run_id))
            .await
    }

    async fn transition_stage(&self, key: &ArtifactKey, version: u64, stage: Stage) -> Result<(), RegistryError> {
        self.bounded("transition_stage", self.inner.transition_stage(key, version, stage))
            .await
    }

    async fn load_artifact(&self, artifact: &ArtifactRef) -> Result<Vec<u8>, RegistryError> {
        self.bounded("load_artifact", self.inner.load_artifact(artifact))
            .await
    }

    async fn list_versions(&self, key: &ArtifactKey) -> Result<Vec<ArtifactRef>, RegistryError> {
        self.bounded("list_versions", self.inner.list_versions(key))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EntityId;
    use crate::registry::InMemoryRegistry;

    #[tokio::test]
    async fn test_slow_registry_times_out() {
        let slow = Arc::new(SlowRegistry(Arc::new(InMemoryRegistry::new("station"))));
        let timed = TimedRegistry::new(slow, Duration::from_millis(50));

        let err = timed
            .get_latest_version(&ArtifactKey::model(EntityId(1)), Stage::Production)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Timeout { operation: "get_latest_version", .. }));
    }

    #[tokio::test]
    async fn test_fast_registry_passes_through() {
        let timed = TimedRegistry::new(Arc::new(InMemoryRegistry::new("station")), Duration::from_secs(1));
        let key = ArtifactKey::model(EntityId(1));
        let registered = timed.register(&key, vec![1], "run").await.unwrap();
        assert_eq!(timed.get_latest_version(&key, Stage::Staging).await.unwrap(), registered);
    }

    /// Delegates after sleeping past any reasonable timeout.
    struct SlowRegistry(Arc<dyn ModelRegistry>);

    #[async_trait]
    impl ModelRegistry for SlowRegistry {
        async fn get_latest_version(&self, key: &ArtifactKey, stage: Stage) -> Result<ArtifactRef, RegistryError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            self.0.get_latest_version(key, stage).await
        }
        async fn register(&self, key: &ArtifactKey, artifact: Vec<u8>, run_id: &str) -> Result<ArtifactRef, RegistryError> {
            self.0.register(key, artifact, run_id).await
        }
        async fn transition_stage(&self, key: &ArtifactKey, version: u64, stage: Stage) -> Result<(), RegistryError> {
            self.0.transition_stage(key, version, stage).await
        }
        async fn load_artifact(&self, artifact: &ArtifactRef) -> Result<Vec<u8>, RegistryError> {
            self.0.load_artifact(artifact).await
        }
        async fn list_versions(&self, key: &ArtifactKey) -> Result<Vec<ArtifactRef>, RegistryError> {
            self.0.list_versions(key).await
        }
    }
}
