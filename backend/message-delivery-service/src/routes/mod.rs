pub mod admin;
pub mod messages;

use crate::error::AppError;
use actix_web::{
    error::{JsonPayloadError, QueryPayloadError},
    web, HttpRequest,
};

/// Malformed or mistyped JSON bodies answer with the same error shape as
/// every other 400.
fn json_error_handler(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    AppError::BadRequest(format!("invalid request body: {err}")).into()
}

fn query_error_handler(err: QueryPayloadError, _req: &HttpRequest) -> actix_web::Error {
    AppError::BadRequest(format!("invalid query string: {err}")).into()
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(json_error_handler))
        .app_data(web::QueryConfig::default().error_handler(query_error_handler))
        .service(messages::send_message)
        .service(messages::get_conversation)
        .service(messages::mark_read)
        .service(messages::mark_delivered)
        .service(messages::delete_message)
        .service(admin::stop_worker)
        .service(admin::health)
        .service(admin::metrics_endpoint);
}
