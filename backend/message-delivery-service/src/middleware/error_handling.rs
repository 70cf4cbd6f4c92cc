use crate::error::AppError;
use actix_web::{http::StatusCode, HttpResponse};
use serde::{Deserialize, Serialize};

/// JSON body returned for every 4xx/5xx.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

pub fn map_error(err: &AppError) -> (StatusCode, ErrorResponse) {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    // Internal detail stays in the logs.
    let message = match err {
        AppError::Config(_) | AppError::StartServer(_) => AppError::Internal.to_string(),
        _ => err.to_string(),
    };

    (
        status,
        ErrorResponse {
            error: message,
            code: err.code().to_string(),
        },
    )
}

pub fn into_response(err: &AppError) -> HttpResponse {
    let (status, body) = map_error(err);
    if status.is_server_error() {
        tracing::error!(error = %err, "request failed");
    }
    HttpResponse::build(status).json(body)
}
