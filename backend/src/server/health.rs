//! Health endpoints: liveness and readiness probes for orchestration.

use actix_web::{get, web, HttpResponse};
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Default)]
pub struct HealthState {
    ready: AtomicBool,
}

impl HealthState {
    /// Create a new health state starting as not ready.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the service as ready.
    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Relaxed);
    }

    /// Return readiness state.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }
}

/// Readiness probe. 200 once the pools and router are wired; 503 before.
#[get("/health/ready")]
pub async fn ready(state: web::Data<HealthState>) -> HttpResponse {
    if state.is_ready() {
        HttpResponse::Ok().finish()
    } else {
        HttpResponse::ServiceUnavailable().finish()
    }
}

/// Liveness probe. 200 whenever the process can answer.
#[get("/health/live")]
pub async fn live() -> HttpResponse {
    HttpResponse::Ok().finish()
}
