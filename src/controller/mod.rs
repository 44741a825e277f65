use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant};
use tracing::{info, warn};

use crate::config::{Config, RegistryBackend};
use crate::data::{CsvDatasetProvider, DatasetProvider};
use crate::forecast::ForecastService;
use crate::lifecycle::{FileMetricsSink, LifecycleSettings, MetricsSink, PromotionEngine};
use crate::ml::{build_model, LinearRegressionModel};
use crate::registry::{FsRegistry, InMemoryRegistry, ModelRegistry, PairStore, TimedRegistry};

/// Regressor architecture trained and served for every station.
pub type StationModel = LinearRegressionModel;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Config,
    pub engine: Arc<PromotionEngine<StationModel>>,
    pub forecasts: Arc<ForecastService<StationModel>>,
}

impl AppState {
    pub async fn new(cfg: Config) -> Result<Self> {
        let backend: Arc<dyn ModelRegistry> = match cfg.registry.backend {
            RegistryBackend::Memory => Arc::new(InMemoryRegistry::new(cfg.registry.name_prefix.clone())),
            RegistryBackend::Fs => {
                tokio::fs::create_dir_all(&cfg.registry.root).await?;
                Arc::new(FsRegistry::new(cfg.registry.root.clone(), cfg.registry.name_prefix.clone()))
            }
        };
        let registry = Arc::new(TimedRegistry::new(
            backend,
            Duration::from_secs(cfg.registry.timeout_seconds),
        ));
        let provider = Arc::new(CsvDatasetProvider::new(
            cfg.data.root.clone(),
            cfg.data.target_column.clone(),
        ));
        let sink = Arc::new(FileMetricsSink::new(cfg.reports.dir.clone()));

        info!(
            backend = ?cfg.registry.backend,
            data_root = %cfg.data.root.display(),
            "lifecycle components ready"
        );
        Ok(Self::from_parts(cfg, registry, provider, sink))
    }

    /// Assemble the state from already built adapters.
    pub fn from_parts(
        cfg: Config,
        registry: Arc<dyn ModelRegistry>,
        provider: Arc<dyn DatasetProvider>,
        sink: Arc<dyn MetricsSink>,
    ) -> Self {
        let pairs = PairStore::new(registry, cfg.registry.promote_retries);
        let engine = Arc::new(PromotionEngine::new(
            provider.clone(),
            pairs.clone(),
            sink,
            Arc::new(build_model),
            LifecycleSettings::from_config(&cfg),
        ));
        let forecasts = Arc::new(ForecastService::new(pairs, provider, &cfg.serving));

        Self {
            cfg,
            engine,
            forecasts,
        }
    }
}

/// Periodically run the lifecycle over every station with data.
pub fn spawn_lifecycle_tasks(state: AppState) {
    let engine = state.engine.clone();
    let lifecycle = state.cfg.lifecycle.clone();

    tokio::spawn(async move {
        let period = Duration::from_secs(lifecycle.cycle_every_minutes.max(1) * 60);
        let start = if lifecycle.run_on_startup {
            Instant::now()
        } else {
            Instant::now() + period
        };
        let mut interval = interval_at(start, period);
        loop {
            interval.tick().await;
            if let Err(e) = engine.run_all().await {
                warn!(error = %e, "lifecycle batch failed");
            }
        }
    });
}
