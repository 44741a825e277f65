pub mod error;
pub mod response;
pub mod v1;

use axum::{http::StatusCode, response::IntoResponse, routing::get, Router};
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::controller::AppState;

pub fn router(state: AppState) -> Router {
    let timeout = Duration::from_secs(state.cfg.server.request_timeout_secs);

    Router::new()
        .nest("/api/v1", v1::router(state))
        .route("/healthz", get(healthz))
        .layer(
            ServiceBuilder::new()
                .layer(axum::extract::DefaultBodyLimit::max(1024 * 1024))
                .layer(TimeoutLayer::new(timeout)),
        )
        .layer(TraceLayer::new_for_http())
}

pub async fn healthz() -> impl IntoResponse {
    StatusCode::OK
}

#[cfg(feature = "metrics")]
pub fn with_metrics(app: Router) -> Router {
    use axum_prometheus::PrometheusMetricLayer;
    let (layer, handle) = PrometheusMetricLayer::pair();

    let metrics_router = Router::new().route("/metrics", get(move || async move { handle.render() }));

    app.layer(layer).merge(metrics_router)
}
