use crate::middleware::error_handling;
use crate::services::ProduceError;
use crate::store::StoreError;
use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error, Clone)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("message not found")]
    NotFound,

    #[error("database error: {0}")]
    Database(String),

    /// The durable log rejected or could not take the write.
    #[error("queue error: {0}")]
    Queue(String),

    #[error("internal server error")]
    Internal,
}

impl AppError {
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::BadRequest(_) => 400,
            AppError::NotFound => 404,
            AppError::Config(_)
            | AppError::StartServer(_)
            | AppError::Database(_)
            | AppError::Queue(_)
            | AppError::Internal => 500,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Config(_) | AppError::StartServer(_) | AppError::Internal => {
                "INTERNAL_SERVER_ERROR"
            }
            AppError::BadRequest(_) => "INVALID_REQUEST",
            AppError::NotFound => "MESSAGE_NOT_FOUND",
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::Queue(_) => "QUEUE_ERROR",
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(AppError::status_code(self))
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> HttpResponse {
        error_handling::into_response(self)
    }
}

impl From<ProduceError> for AppError {
    fn from(e: ProduceError) -> Self {
        match e {
            ProduceError::Validation(v) => AppError::BadRequest(v.to_string()),
            ProduceError::Append(a) => AppError::Queue(a.to_string()),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        AppError::Database(e.to_string())
    }
}
