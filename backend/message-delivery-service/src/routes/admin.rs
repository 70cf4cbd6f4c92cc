use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::routes::messages::StatusResponse;
use crate::state::AppState;
use actix_web::{get, post, web, HttpResponse};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub worker: String,
}

/// Signal the delivery worker to stop. Repeated calls are harmless.
///
/// Replies as soon as the signal fires; a unit of work already in progress
/// still commits or rolls back, and `/health` reports `stopped` afterwards.
#[post("/stop-worker")]
pub async fn stop_worker(state: web::Data<AppState>) -> HttpResponse {
    state.worker.stop();
    HttpResponse::Ok().json(StatusResponse {
        status: "Worker stop requested".into(),
    })
}

#[get("/health")]
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok".into(),
        worker: state.worker.state().to_string(),
    })
}

#[get("/metrics")]
pub async fn metrics_endpoint() -> AppResult<HttpResponse> {
    let body = metrics::render().map_err(|e| {
        tracing::error!(error = %e, "failed to encode metrics");
        AppError::Internal
    })?;

    Ok(HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(body))
}
