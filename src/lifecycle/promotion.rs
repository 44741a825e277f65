//! Promotion Engine
//!
//! One cycle per station: train a candidate pair, register it at `Staging`,
//! compare it with the production pair on the same test window and promote
//! or hold. Cycles for different stations run concurrently; cycles for the
//! same station are serialised by `EntityLocks`.

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use strum::Display;
use tracing::{info, info_span, warn, Instrument};

use super::{EntityLocks, MetricsRecord, MetricsSink, RunContext, RunSummary};
use crate::config::Config;
use crate::data::{evaluation_sequences, prepare_model_data, DatasetProvider, WindowPair, WindowSplitter};
use crate::domain::{EntityId, ModelScalerPair, Stage};
use crate::error::LifecycleError;
use crate::ml::{
    evaluate_model_performance, InputShape, MetricTriple, MinMaxScaler, ModelTrainer, PersistableModel, Regressor,
    TrainingConfig,
};
use crate::registry::{LoadedPair, PairStore, ReconcileOutcome};

/// Architecture factory. Called once per cycle with the prepared input shape.
pub type ModelBuilder<M> = Arc<dyn Fn(InputShape) -> M + Send + Sync>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PromotionDecision {
    /// No production pair existed; the candidate was promoted unconditionally
    ColdStart,
    /// Candidate MSE was strictly lower than production MSE
    Promoted,
    /// Production pair kept serving
    Held,
}

/// Outcome of one station's cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub entity_id: EntityId,
    pub decision: PromotionDecision,
    pub candidate: MetricTriple,
    pub production: Option<MetricTriple>,
    pub pair: ModelScalerPair,
    pub reconcile: ReconcileOutcome,
    pub run: RunSummary,
}

#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub train_ratio: f64,
    pub lookback: usize,
    pub training: TrainingConfig,
    pub max_parallel_entities: usize,
}

impl LifecycleSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            train_ratio: cfg.data.train_ratio,
            lookback: cfg.training.lookback,
            training: cfg.training.trainer_config(),
            max_parallel_entities: cfg.lifecycle.max_parallel_entities,
        }
    }
}

struct Candidate<M> {
    model: M,
    scaler: MinMaxScaler,
    metrics: MetricTriple,
    /// Scaled targets and predictions, one per test-window row
    y_test: Vec<f64>,
    predictions: Vec<f64>,
}

impl<M> Candidate<M> {
    /// Metrics over the test rows from `skip` onwards.
    fn score_from(&self, skip: usize, windows: &WindowPair) -> anyhow::Result<MetricTriple> {
        if skip == 0 {
            return Ok(self.metrics);
        }
        evaluate_model_performance(
            &self.y_test[skip..],
            &self.predictions[skip..],
            &windows.history,
            &self.scaler,
        )
    }
}

/// Production pair scored on the candidate's test window.
struct ProductionScore {
    metrics: MetricTriple,
    /// Leading test rows the production look-back could not reach
    skipped: usize,
}

/// Everything a cycle decides, before its run is closed.
struct Decided {
    decision: PromotionDecision,
    candidate: MetricTriple,
    production: Option<MetricTriple>,
    pair: ModelScalerPair,
    reconcile: ReconcileOutcome,
}

pub struct PromotionEngine<M> {
    provider: Arc<dyn DatasetProvider>,
    splitter: WindowSplitter,
    pairs: PairStore,
    sink: Arc<dyn MetricsSink>,
    trainer: Arc<ModelTrainer>,
    builder: ModelBuilder<M>,
    locks: EntityLocks,
    settings: LifecycleSettings,
}

impl<M: PersistableModel> PromotionEngine<M> {
    pub fn new(
        provider: Arc<dyn DatasetProvider>,
        pairs: PairStore,
        sink: Arc<dyn MetricsSink>,
        builder: ModelBuilder<M>,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            splitter: WindowSplitter::new(provider.clone(), settings.train_ratio, settings.lookback),
            trainer: Arc::new(ModelTrainer::new(settings.training.clone())),
            locks: EntityLocks::new(),
            provider,
            pairs,
            sink,
            builder,
            settings,
        }
    }

    pub fn pairs(&self) -> &PairStore {
        &self.pairs
    }

    /// Run one train/evaluate/promote cycle for `entity`.
    pub async fn run_cycle(&self, entity: EntityId) -> Result<CycleReport, LifecycleError> {
        let _guard = self.locks.lock(entity).await;
        let mut run = RunContext::start(entity);
        let span = info_span!("lifecycle_cycle", entity_id = %entity, run_id = %run.run_id());

        async move {
            match self.cycle(entity, &mut run).await {
                Ok(decided) => Ok(CycleReport {
                    entity_id: entity,
                    decision: decided.decision,
                    candidate: decided.candidate,
                    production: decided.production,
                    pair: decided.pair,
                    reconcile: decided.reconcile,
                    run: run.finish(),
                }),
                Err(e) => {
                    run.fail(&e.to_string());
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Run a cycle for every station the dataset provider lists. One
    /// station's failure does not stop the others.
    pub async fn run_all(&self) -> Result<Vec<(EntityId, Result<CycleReport, LifecycleError>)>, LifecycleError> {
        let started = Instant::now();
        let entities = self.provider.entities().await?;

        let mut results: Vec<_> = stream::iter(entities)
            .map(|entity| async move { (entity, self.run_cycle(entity).await) })
            .buffer_unordered(self.settings.max_parallel_entities.max(1))
            .collect()
            .await;
        results.sort_by_key(|(entity, _)| *entity);

        for (entity, result) in &results {
            if let Err(e) = result {
                warn!(entity_id = %entity, error = %e, "lifecycle cycle failed");
            }
        }
        info!(
            entities = results.len(),
            failed = results.iter().filter(|(_, r)| r.is_err()).count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "lifecycle batch finished"
        );
        Ok(results)
    }

    async fn cycle(&self, entity: EntityId, run: &mut RunContext) -> Result<Decided, LifecycleError> {
        let reconcile = self.pairs.reconcile(entity).await?;
        let windows = Arc::new(self.splitter.split(entity).await?);

        let training = self.trainer.config();
        run.log_param("epochs", training.epochs);
        run.log_param("batch_size", training.batch_size);
        run.log_param("learning_rate", training.learning_rate);
        run.log_param("lookback", self.settings.lookback);
        run.log_param("dataset_size", windows.history.len());
        run.log_param("train_rows", windows.train.len());
        run.log_param("test_rows", windows.test.len());

        let candidate = self.train_candidate(entity, windows.clone()).await?;
        run.log_metric("mse_test", candidate.metrics.mse);
        run.log_metric("mae_test", candidate.metrics.mae);
        run.log_metric("evs_test", candidate.metrics.evs);

        let pair = self
            .pairs
            .register_pair(entity, &candidate.model, &candidate.scaler, run.run_id())
            .await?;

        let (decision, compared, production) = match self.pairs.latest_pair(entity, Stage::Production).await? {
            None => {
                self.pairs.promote(&pair).await?;
                (PromotionDecision::ColdStart, candidate.metrics, None)
            }
            Some(current) => {
                let loaded = self.pairs.load::<M>(&current).await?;
                let score = self.evaluate_production(entity, loaded, windows.clone()).await?;
                let compared = candidate
                    .score_from(score.skipped, &windows)
                    .map_err(LifecycleError::training)?;
                if score.skipped > 0 {
                    warn!(
                        skipped_rows = score.skipped,
                        "production look-back exceeds available context, comparing on a shorter window"
                    );
                }
                let production = score.metrics;
                run.log_metric("mse_production", production.mse);
                if compared.beats(&production) {
                    self.pairs.promote(&pair).await?;
                    (PromotionDecision::Promoted, compared, Some(production))
                } else {
                    (PromotionDecision::Held, compared, Some(production))
                }
            }
        };

        info!(
            candidate_mse = compared.mse,
            production_mse = production.map(|p| p.mse),
            decision = %decision,
            model_version = pair.model.version,
            "promotion decided"
        );

        let record = MetricsRecord {
            entity_id: entity,
            run_id: run.run_id().to_string(),
            recorded_at: chrono::Utc::now(),
            candidate: compared,
            production,
            decision,
        };
        if let Err(e) = self.sink.record(&record).await {
            warn!(error = %e, "failed to record cycle metrics");
        }

        Ok(Decided {
            decision,
            candidate: compared,
            production,
            pair,
            reconcile,
        })
    }

    async fn train_candidate(&self, entity: EntityId, windows: Arc<WindowPair>) -> Result<Candidate<M>, LifecycleError> {
        let trainer = self.trainer.clone();
        let builder = self.builder.clone();
        let lookback = self.settings.lookback;

        tokio::task::spawn_blocking(move || {
            let mut scaler = MinMaxScaler::default();
            let data = prepare_model_data(&windows.history, &mut scaler, &windows.train, &windows.test, lookback)
                .map_err(|e| LifecycleError::data(entity, format!("{e:#}")))?;
            let trained = trainer
                .train(&data, |shape| (*builder)(shape))
                .map_err(LifecycleError::training)?;
            let metrics =
                evaluate_model_performance(&data.y_test, &trained.test_predictions, &windows.history, &scaler)
                    .map_err(LifecycleError::training)?;
            Ok(Candidate {
                model: trained.model,
                scaler,
                metrics,
                y_test: data.y_test,
                predictions: trained.test_predictions,
            })
        })
        .await
        .map_err(|e| LifecycleError::Training(format!("training task failed: {e}")))?
    }

    /// Score the production pair on the candidate's test rows, through the
    /// production scaler and at the production model's own look-back. Context
    /// rows come from the history before the test window.
    async fn evaluate_production(
        &self,
        entity: EntityId,
        loaded: LoadedPair<M>,
        windows: Arc<WindowPair>,
    ) -> Result<ProductionScore, LifecycleError> {
        tokio::task::spawn_blocking(move || {
            let LoadedPair { model, scaler, .. } = loaded;
            let lookback = model.input_shape().lookback;
            let seqs = evaluation_sequences(&windows.history, &scaler, windows.test_range.clone(), lookback)
                .map_err(|e| LifecycleError::data(entity, format!("{e:#}")))?;
            let predictions = model.predict(&seqs.x).map_err(LifecycleError::training)?;
            let metrics = evaluate_model_performance(&seqs.y, &predictions, &windows.history, &scaler)
                .map_err(LifecycleError::training)?;
            Ok(ProductionScore {
                metrics,
                skipped: seqs.first_target - windows.test_range.start,
            })
        })
        .await
        .map_err(|e| LifecycleError::Training(format!("evaluation task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::InMemoryDatasetProvider;
    use crate::domain::table::fixtures::hourly_table;
    use crate::domain::Split;
    use crate::lifecycle::InMemoryMetricsSink;
    use crate::ml::{build_model, LinearRegressionModel};
    use crate::registry::{InMemoryRegistry, MockModelRegistry, RegistryError};

    fn settings() -> LifecycleSettings {
        LifecycleSettings {
            train_ratio: 0.8,
            lookback: 3,
            training: TrainingConfig::default(),
            max_parallel_entities: 2,
        }
    }

    fn provider_with(entity: u32, n: usize) -> Arc<InMemoryDatasetProvider> {
        let provider = Arc::new(InMemoryDatasetProvider::new());
        let values: Vec<f64> = (0..n).map(|i| (i % 12) as f64 + 5.0).collect();
        provider.insert(EntityId(entity), Split::Train, hourly_table(&values));
        provider
    }

    fn engine(
        provider: Arc<InMemoryDatasetProvider>,
        registry: Arc<dyn crate::registry::ModelRegistry>,
        sink: Arc<InMemoryMetricsSink>,
    ) -> PromotionEngine<LinearRegressionModel> {
        PromotionEngine::new(provider, PairStore::new(registry, 1), sink, Arc::new(build_model), settings())
    }

    #[tokio::test]
    async fn test_cold_start_then_tie_holds() {
        let sink = Arc::new(InMemoryMetricsSink::new());
        let engine = engine(
            provider_with(1, 60),
            Arc::new(InMemoryRegistry::new("station")),
            sink.clone(),
        );

        let first = engine.run_cycle(EntityId(1)).await.unwrap();
        assert_eq!(first.decision, PromotionDecision::ColdStart);
        assert_eq!(first.reconcile, ReconcileOutcome::Empty);
        assert_eq!(first.run.params["dataset_size"], "60");

        // Unchanged data and deterministic training reproduce the same MSE.
        let second = engine.run_cycle(EntityId(1)).await.unwrap();
        assert_eq!(second.decision, PromotionDecision::Held);
        assert_eq!(second.production.unwrap().mse, second.candidate.mse);

        let production = engine
            .pairs()
            .latest_pair(EntityId(1), Stage::Production)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(production.run_id(), first.run.run_id);
        assert_eq!(sink.records_for(EntityId(1)).len(), 2);
    }

    #[tokio::test]
    async fn test_registry_failure_aborts_without_promotion() {
        let mut mock = MockModelRegistry::new();
        mock.expect_get_latest_version()
            .returning(|_, _| Err(RegistryError::Timeout { operation: "get_latest_version", seconds: 10 }));
        mock.expect_transition_stage().never();
        mock.expect_register().never();

        let sink = Arc::new(InMemoryMetricsSink::new());
        let engine = engine(provider_with(1, 60), Arc::new(mock), sink.clone());

        let err = engine.run_cycle(EntityId(1)).await.unwrap_err();
        assert!(matches!(err, LifecycleError::RegistryIo(_)));
        assert!(sink.records().is_empty());
    }

    #[tokio::test]
    async fn test_run_all_isolates_failures() {
        let provider = provider_with(1, 60);
        provider.insert(EntityId(2), Split::Train, hourly_table(&[1.0, 2.0, 3.0]));
        let engine = engine(provider, Arc::new(InMemoryRegistry::new("station")), Arc::new(InMemoryMetricsSink::new()));

        let results = engine.run_all().await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].1.is_ok());
        assert!(matches!(results[1].1, Err(LifecycleError::Data { entity_id: EntityId(2), .. })));
    }
}
