//! Realtime hub entry point: per-list WebSocket fanout bridged by the
//! shared pub/sub bus. Does not touch the database.

use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use backend::domain::ports::ListBus;
use backend::inbound::ws::{ws_entry, ListHub, WsState};
use backend::outbound::bus::RedisListBus;
use backend::server::config::AppConfig;
use backend::server::health::{live, ready, HealthState};

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

    let bus: Arc<dyn ListBus> = Arc::new(
        RedisListBus::connect(&config.redis_url)
            .await
            .map_err(std::io::Error::other)?,
    );
    info!(url = %config.redis_url, "bus connected");

    let state = WsState {
        hub: Arc::new(ListHub::new(
            bus,
            config.hub.max_per_list,
            config.hub.subscribe_retry,
        )),
        ping_interval: config.hub.ping_interval,
        read_deadline: config.hub.read_deadline,
    };

    let health_state = web::Data::new(HealthState::new());
    let server_health_state = health_state.clone();
    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .app_data(server_health_state.clone())
            .service(ws_entry)
            .service(ready)
            .service(live)
    })
    .bind(config.realtime_bind_addr.as_str())?;

    health_state.mark_ready();
    info!(
        addr = %config.realtime_bind_addr,
        max_per_list = config.hub.max_per_list,
        "realtime hub listening"
    );
    let result = server.run().await;

    // Sockets drain with the server; the bus connection drops after.
    info!("realtime hub stopped");
    result
}
