//! One-shot drain of the user-list index retry queues across every user
//! cluster; suitable for cron.

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use backend::outbound::persistence::IndexRetryWorker;
use backend::server::build_router;
use backend::server::config::AppConfig;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    if let Err(e) = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init()
    {
        warn!(error = %e, "tracing init failed");
    }

    let config = AppConfig::from_env().map_err(std::io::Error::other)?;
    let router = build_router(&config);

    let worker = IndexRetryWorker::new(
        Arc::clone(&router),
        config.retry.max_retries,
        config.retry.batch_size,
    );
    let stats = worker.run_pass().await.map_err(std::io::Error::other)?;
    info!(
        applied = stats.applied,
        failed = stats.failed,
        "retry drain completed"
    );
    Ok(())
}
