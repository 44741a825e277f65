mod common;

use parking_lot::Mutex;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::{constant_builder, station_table, ConstantModel, FlakyRegistry};
use station_forecaster::config::ServingConfig;
use station_forecaster::data::InMemoryDatasetProvider;
use station_forecaster::domain::{ArtifactKey, EntityId, Split, Stage};
use station_forecaster::error::LifecycleError;
use station_forecaster::forecast::{ForecastError, ForecastService};
use station_forecaster::lifecycle::{InMemoryMetricsSink, LifecycleSettings, PromotionDecision, PromotionEngine};
use station_forecaster::ml::TrainingConfig;
use station_forecaster::registry::{InMemoryRegistry, ModelRegistry, PairStore, ReconcileOutcome};

const GOOD: f64 = 0.5;
const POOR: f64 = 0.9;

struct Harness {
    engine: PromotionEngine<ConstantModel>,
    pairs: PairStore,
    registry: Arc<FlakyRegistry>,
    provider: Arc<InMemoryDatasetProvider>,
    sink: Arc<InMemoryMetricsSink>,
    next_value: Arc<Mutex<f64>>,
}

fn build_engine(
    pairs: &PairStore,
    provider: &Arc<InMemoryDatasetProvider>,
    sink: &Arc<InMemoryMetricsSink>,
    next_value: &Arc<Mutex<f64>>,
    lookback: usize,
    train_ratio: f64,
) -> PromotionEngine<ConstantModel> {
    PromotionEngine::new(
        provider.clone(),
        pairs.clone(),
        sink.clone(),
        constant_builder(next_value.clone()),
        LifecycleSettings {
            train_ratio,
            lookback,
            training: TrainingConfig::default(),
            max_parallel_entities: 4,
        },
    )
}

impl Harness {
    fn new() -> Self {
        let registry = Arc::new(FlakyRegistry::new(Arc::new(InMemoryRegistry::new("station"))));
        let provider = Arc::new(InMemoryDatasetProvider::new());
        provider.insert(EntityId(1), Split::Train, station_table(100));
        let sink = Arc::new(InMemoryMetricsSink::new());
        let next_value = Arc::new(Mutex::new(POOR));

        let pairs = PairStore::new(registry.clone(), 2);
        let engine = build_engine(&pairs, &provider, &sink, &next_value, 3, 0.8);
        Self {
            engine,
            pairs,
            registry,
            provider,
            sink,
            next_value,
        }
    }

    /// Another engine over the same registry and data, as after a config change.
    fn engine_with(&self, lookback: usize, train_ratio: f64) -> PromotionEngine<ConstantModel> {
        build_engine(&self.pairs, &self.provider, &self.sink, &self.next_value, lookback, train_ratio)
    }

    async fn cycle_with(&self, value: f64) -> Result<station_forecaster::lifecycle::CycleReport, LifecycleError> {
        *self.next_value.lock() = value;
        self.engine.run_cycle(EntityId(1)).await
    }

    async fn production_run(&self) -> Option<String> {
        self.pairs
            .latest_pair(EntityId(1), Stage::Production)
            .await
            .unwrap()
            .map(|p| p.run_id().to_string())
    }

    fn forecasts(&self) -> ForecastService<ConstantModel> {
        let serving = ServingConfig {
            max_horizon: 7,
            min_entity_id: 0,
            max_entity_id: 29,
        };
        ForecastService::new(self.pairs.clone(), self.provider.clone(), &serving)
    }
}

#[tokio::test]
async fn test_cold_start_promotes_unconditionally() {
    let h = Harness::new();
    let report = h.cycle_with(POOR).await.unwrap();

    assert_eq!(report.decision, PromotionDecision::ColdStart);
    assert!(report.production.is_none());
    assert_eq!(h.production_run().await, Some(report.run.run_id.clone()));

    let records = h.sink.records_for(EntityId(1));
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].decision, PromotionDecision::ColdStart);
    assert_eq!(report.run.params["epochs"], "10");
    assert_eq!(report.run.params["batch_size"], "32");
}

#[tokio::test]
async fn test_better_candidate_is_promoted() {
    let h = Harness::new();
    let first = h.cycle_with(POOR).await.unwrap();
    let second = h.cycle_with(GOOD).await.unwrap();

    assert_eq!(second.decision, PromotionDecision::Promoted);
    assert!(second.candidate.mse < second.production.unwrap().mse);
    assert_eq!(h.production_run().await, Some(second.run.run_id.clone()));

    let models = h.registry.list_versions(&ArtifactKey::model(EntityId(1))).await.unwrap();
    assert_eq!(models[0].run_id, first.run.run_id);
    assert_eq!(models[0].stage, Stage::Archived);
    assert_eq!(models[1].stage, Stage::Production);
}

#[tokio::test]
async fn test_worse_candidate_is_held() {
    let h = Harness::new();
    let first = h.cycle_with(GOOD).await.unwrap();
    let second = h.cycle_with(POOR).await.unwrap();

    assert_eq!(second.decision, PromotionDecision::Held);
    assert_eq!(h.production_run().await, Some(first.run.run_id.clone()));
    assert_eq!(second.pair.model.stage, Stage::Staging);
}

#[tokio::test]
async fn test_equal_mse_keeps_incumbent() {
    let h = Harness::new();
    let first = h.cycle_with(GOOD).await.unwrap();
    let second = h.cycle_with(GOOD).await.unwrap();

    assert_eq!(second.decision, PromotionDecision::Held);
    assert_eq!(second.candidate.mse, second.production.unwrap().mse);
    assert_eq!(h.production_run().await, Some(first.run.run_id));
}

#[tokio::test]
async fn test_failed_scaler_promotion_rolls_back_model() {
    let h = Harness::new();
    let first = h.cycle_with(POOR).await.unwrap();

    h.registry.fail_scaler_promotion.store(true, Ordering::SeqCst);
    let err = h.cycle_with(GOOD).await.unwrap_err();
    assert!(matches!(err, LifecycleError::RegistryIo(_)));

    // Both halves of production still come from the first run.
    assert_eq!(h.production_run().await, Some(first.run.run_id.clone()));
    let models = h.registry.list_versions(&ArtifactKey::model(EntityId(1))).await.unwrap();
    assert_eq!(models[1].stage, Stage::Staging);

    h.registry.fail_scaler_promotion.store(false, Ordering::SeqCst);
    let third = h.cycle_with(GOOD).await.unwrap();
    assert_eq!(third.decision, PromotionDecision::Promoted);
    assert_eq!(h.production_run().await, Some(third.run.run_id));
}

#[tokio::test]
async fn test_failed_cold_start_leaves_no_half_pair() {
    let h = Harness::new();
    h.registry.fail_scaler_promotion.store(true, Ordering::SeqCst);

    assert!(h.cycle_with(POOR).await.is_err());
    assert_eq!(h.production_run().await, None);
    let err = h
        .registry
        .get_latest_version(&ArtifactKey::model(EntityId(1)), Stage::Production)
        .await
        .unwrap_err();
    assert!(matches!(err, station_forecaster::registry::RegistryError::NotFound { .. }));
}

#[tokio::test]
async fn test_registry_outage_never_cold_starts() {
    let h = Harness::new();
    h.registry.fail_lookups.store(true, Ordering::SeqCst);

    let err = h.cycle_with(POOR).await.unwrap_err();
    assert!(matches!(err, LifecycleError::RegistryIo(_)));
    assert!(h.sink.records().is_empty());

    h.registry.fail_lookups.store(false, Ordering::SeqCst);
    assert_eq!(h.production_run().await, None);
}

#[tokio::test]
async fn test_run_all_isolates_station_failures() {
    let h = Harness::new();
    h.provider.insert(EntityId(2), Split::Train, station_table(4));
    h.provider.insert(EntityId(3), Split::Train, station_table(60));

    let results = h.engine.run_all().await.unwrap();
    let ids: Vec<EntityId> = results.iter().map(|(e, _)| *e).collect();
    assert_eq!(ids, vec![EntityId(1), EntityId(2), EntityId(3)]);
    assert!(results[0].1.is_ok());
    assert!(matches!(results[1].1, Err(LifecycleError::Data { entity_id: EntityId(2), .. })));
    assert!(results[2].1.is_ok());
}

#[tokio::test]
async fn test_forecast_uses_production_pair() {
    let h = Harness::new();
    let forecasts = h.forecasts();

    let err = forecasts.predict_multiple(1, 3).await.unwrap_err();
    assert!(matches!(err, ForecastError::NotAvailable(EntityId(1))));

    h.cycle_with(GOOD).await.unwrap();
    let forecast = forecasts.predict_multiple(1, 7).await.unwrap();
    assert_eq!(forecast.points.len(), 7);
    // Target range 0..9, so a scaled 0.5 is 4.5 stands.
    assert!(forecast.points.iter().all(|p| (p.value - 4.5).abs() < 1e-9));
    assert!(forecast.points.windows(2).all(|w| w[0].timestamp < w[1].timestamp));

    assert!(forecasts.predict_multiple(1, 0).await.unwrap_err().is_validation());
    assert!(forecasts.predict_multiple(1, 8).await.unwrap_err().is_validation());
}

#[tokio::test]
async fn test_forecast_follows_promotion() {
    let h = Harness::new();
    let forecasts = h.forecasts();

    h.cycle_with(POOR).await.unwrap();
    let before = forecasts.predict_multiple(1, 1).await.unwrap();
    h.cycle_with(GOOD).await.unwrap();
    let after = forecasts.predict_multiple(1, 1).await.unwrap();

    assert!(after.model_version > before.model_version);
    assert!((after.points[0].value - 4.5).abs() < 1e-9);
    assert!((before.points[0].value - 8.1).abs() < 1e-9);
}

#[tokio::test]
async fn test_empty_history_is_data_error() {
    let h = Harness::new();
    let err = h.engine.run_cycle(EntityId(9)).await.unwrap_err();
    assert!(matches!(err, LifecycleError::Data { entity_id: EntityId(9), .. }));
}

#[tokio::test]
async fn test_cancelled_cycle_still_promotes_whole_pair() {
    let h = Harness::new();
    h.registry.scaler_promotion_delay_ms.store(200, Ordering::SeqCst);
    *h.next_value.lock() = POOR;

    tokio::select! {
        _ = h.engine.run_cycle(EntityId(1)) => panic!("cycle finished before the scaler transition"),
        _ = h.registry.scaler_promotion_started.notified() => {}
    }
    // The cycle future is gone; the transition it started must still land.
    tokio::time::sleep(Duration::from_millis(400)).await;

    let production = h
        .pairs
        .latest_pair(EntityId(1), Stage::Production)
        .await
        .unwrap()
        .expect("production pair");
    let model = h
        .registry
        .get_latest_version(&ArtifactKey::model(EntityId(1)), Stage::Production)
        .await
        .unwrap();
    assert_eq!(model.run_id, production.run_id());
    assert_eq!(h.pairs.reconcile(EntityId(1)).await.unwrap(), ReconcileOutcome::Consistent);
}

#[tokio::test]
async fn test_shorter_lookback_is_scored_on_same_rows() {
    let h = Harness::new();
    h.provider.insert(EntityId(1), Split::Train, station_table(20));

    *h.next_value.lock() = GOOD;
    let long = h.engine_with(5, 0.8);
    assert_eq!(long.run_cycle(EntityId(1)).await.unwrap().decision, PromotionDecision::ColdStart);

    // Test rows 16..20 hold targets 6..9: 4.5 scores 10.25, 8.1 scores 1.61.
    *h.next_value.lock() = POOR;
    let short = h.engine_with(1, 0.8);
    let report = short.run_cycle(EntityId(1)).await.unwrap();
    assert_eq!(report.decision, PromotionDecision::Promoted);
    assert!((report.production.unwrap().mse - 10.25).abs() < 1e-9);
    assert!((report.candidate.mse - 1.61).abs() < 1e-9);

    let again = short.run_cycle(EntityId(1)).await.unwrap();
    assert_eq!(again.decision, PromotionDecision::Held);
}

#[tokio::test]
async fn test_production_lookback_longer_than_train_window() {
    let h = Harness::new();
    h.provider.insert(EntityId(1), Split::Train, station_table(20));

    *h.next_value.lock() = GOOD;
    h.engine_with(5, 0.8).run_cycle(EntityId(1)).await.unwrap();

    // Test window starts at row 4; look-back 5 first reaches row 5.
    *h.next_value.lock() = POOR;
    let report = h.engine_with(1, 0.2).run_cycle(EntityId(1)).await.unwrap();
    let production = report.production.expect("production scored");
    assert!((production.mse - 8.25).abs() < 1e-9);
}

#[tokio::test]
async fn test_forecast_serves_cached_pair_mid_promotion() {
    let h = Harness::new();
    let forecasts = h.forecasts();
    let first = h.cycle_with(POOR).await.unwrap();
    forecasts.predict_multiple(1, 1).await.unwrap();

    // Model half of a newer pair reaches production before its scaler.
    let next = h.cycle_with(POOR).await.unwrap();
    assert_eq!(next.decision, PromotionDecision::Held);
    h.registry
        .transition_stage(&next.pair.model.key(), next.pair.model.version, Stage::Production)
        .await
        .unwrap();

    let forecast = forecasts.predict_multiple(1, 1).await.unwrap();
    assert_eq!(forecast.run_id, first.run.run_id);
    assert!((forecast.points[0].value - 8.1).abs() < 1e-9);

    let err = h.forecasts().predict_multiple(1, 1).await.unwrap_err();
    assert!(matches!(err, ForecastError::Lifecycle(LifecycleError::PairMismatch(_))));
}
