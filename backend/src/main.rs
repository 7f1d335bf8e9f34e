//! Data-service entry point: wires the cluster fleet, repositories,
//! services, the background index-retry loop, and the health probes.

use std::sync::Arc;
use std::time::Duration;

use actix_web::{web, App, HttpServer};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use backend::outbound::persistence::{bootstrap, IndexRetryWorker};
use backend::server::config::AppConfig;
use backend::server::health::{live, ready, HealthState};
use backend::server::{build_router, build_state};

/// Pause between background retry-queue passes.
const RETRY_PASS_INTERVAL: Duration = Duration::from_secs(60);

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    if let Err(e) = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .try_init()
    {
        warn!(error = %e, "tracing init failed");
    }

    let config = AppConfig::from_env().map_err(std::io::Error::other)?;
    let router = build_router(&config);
    info!(
        user_clusters = config.topology.user_clusters,
        todo_clusters = config.topology.todo_clusters,
        "shard fleet registered"
    );

    if config.ensure_tables {
        bootstrap::ensure_fleet(&router, config.topology.tables_per_db)
            .await
            .map_err(std::io::Error::other)?;
        info!("table provisioning contract applied");
    }

    let state = build_state(Arc::clone(&router), &config)
        .await
        .map_err(std::io::Error::other)?;
    let state = web::Data::new(state);

    // Background convergence for queued secondary-index writes.
    let worker = IndexRetryWorker::new(
        Arc::clone(&router),
        config.retry.max_retries,
        config.retry.batch_size,
    );
    let retry_loop = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(RETRY_PASS_INTERVAL);
        loop {
            ticker.tick().await;
            if let Err(err) = worker.run_pass().await {
                error!(error = %err, "index retry pass failed");
            }
        }
    });

    let health_state = web::Data::new(HealthState::new());
    let server_health_state = health_state.clone();
    let server = HttpServer::new(move || {
        App::new()
            .app_data(server_health_state.clone())
            .app_data(state.clone())
            .service(ready)
            .service(live)
    })
    .bind(config.bind_addr.as_str())?;

    health_state.mark_ready();
    info!(addr = %config.bind_addr, "data service listening");
    let result = server.run().await;

    // Drain order: HTTP first (handled by the server), then background
    // work, then the pools on drop.
    retry_loop.abort();
    info!("data service stopped");
    result
}
