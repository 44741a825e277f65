use axum::{
    extract::{Path, State},
    routing::{get, post},
    Router,
};
use std::time::Instant;

use crate::{
    api::{error::ApiError, response::ApiResponse},
    controller::AppState,
    domain::ModelScalerPair,
    forecast::Forecast,
    lifecycle::CycleReport,
};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/predict/:entity_id/:horizon", get(predict))
        .route("/models/:entity_id", get(production_models))
        .route("/lifecycle/:entity_id/run", post(run_lifecycle))
        .with_state(state)
}

/// GET /api/v1/predict/:entity_id/:horizon - recursive forecast from the production pair
pub async fn predict(
    State(st): State<AppState>,
    Path((entity_id, horizon)): Path<(i64, i64)>,
) -> Result<ApiResponse<Forecast>, ApiError> {
    let started = Instant::now();
    let forecast = st.forecasts.predict_multiple(entity_id, horizon).await?;
    Ok(ApiResponse::success(forecast).with_duration(started.elapsed().as_millis() as u64))
}

/// GET /api/v1/models/:entity_id - current production model and scaler
pub async fn production_models(
    State(st): State<AppState>,
    Path(entity_id): Path<i64>,
) -> Result<ApiResponse<ModelScalerPair>, ApiError> {
    let pair = st.forecasts.production_pair(entity_id).await?;
    Ok(ApiResponse::success(pair))
}

/// POST /api/v1/lifecycle/:entity_id/run - train, evaluate and promote once
///
/// The cycle runs detached from the request, so a timeout or a client
/// disconnect leaves it to finish under the station's lock.
pub async fn run_lifecycle(
    State(st): State<AppState>,
    Path(entity_id): Path<i64>,
) -> Result<ApiResponse<CycleReport>, ApiError> {
    let started = Instant::now();
    let entity = st.forecasts.check_entity(entity_id)?;
    let engine = st.engine.clone();
    let report = tokio::spawn(async move { engine.run_cycle(entity).await })
        .await
        .map_err(|e| ApiError::InternalError(format!("lifecycle task failed: {e}")))??;
    Ok(ApiResponse::success(report).with_duration(started.elapsed().as_millis() as u64))
}
