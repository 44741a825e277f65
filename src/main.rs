use anyhow::Result;
use axum::Router;
use station_forecaster::{api, config, controller, telemetry};
use config::Config;
use telemetry::init_tracing;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cfg = Config::load()?;

    let app_state = controller::AppState::new(cfg.clone()).await?;

    #[allow(unused_mut)]
    let mut app: Router = api::router(app_state.clone());

    #[cfg(feature = "metrics")]
    {
        app = api::with_metrics(app);
    }

    let addr = cfg.server.socket_addr()?;

    if cfg.server.host == "0.0.0.0" {
        warn!("server binding to 0.0.0.0, the lifecycle trigger endpoint is reachable from the network");
    }

    info!(
        %addr,
        cycle_every_minutes = cfg.lifecycle.cycle_every_minutes,
        run_on_startup = cfg.lifecycle.run_on_startup,
        "starting station forecaster"
    );

    controller::spawn_lifecycle_tasks(app_state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(telemetry::shutdown_signal())
        .await?;

    warn!("shutdown complete");
    Ok(())
}
