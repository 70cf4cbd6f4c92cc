use crate::error::{AppError, AppResult};
use crate::models::SendMessageRequest;
use crate::state::AppState;
use actix_web::{delete, get, patch, post, put, web, HttpResponse};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
pub struct QueuedResponse {
    pub status: String,
    pub message_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeliveredResponse {
    pub status: String,
    pub updated: bool,
}

#[derive(Debug, Deserialize)]
pub struct ConversationQuery {
    #[serde(default)]
    pub user1: String,
    #[serde(default)]
    pub user2: String,
}

/// Path ids that are not UUIDs cannot name a stored message.
fn parse_message_id(raw: &str) -> AppResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| AppError::NotFound)
}

/// Validate and queue a message. Persistence happens asynchronously in the
/// delivery worker, so a `200` here means "on the log", not "stored".
#[post("/messages")]
pub async fn send_message(
    state: web::Data<AppState>,
    body: web::Json<SendMessageRequest>,
) -> AppResult<HttpResponse> {
    let queued = state.producer.send(body.into_inner()).await?;

    Ok(HttpResponse::Ok().json(QueuedResponse {
        status: "Message queued".into(),
        message_id: queued.message_id,
    }))
}

#[get("/messages")]
#[instrument(skip(state, query), fields(user1 = %query.user1, user2 = %query.user2))]
pub async fn get_conversation(
    state: web::Data<AppState>,
    query: web::Query<ConversationQuery>,
) -> AppResult<HttpResponse> {
    if query.user1.is_empty() || query.user2.is_empty() {
        return Err(AppError::BadRequest(
            "user1 and user2 query parameters are required".into(),
        ));
    }

    let messages = state.store.conversation(&query.user1, &query.user2).await?;
    Ok(HttpResponse::Ok().json(messages))
}

#[patch("/messages/{id}/read")]
pub async fn mark_read(
    state: web::Data<AppState>,
    id: web::Path<String>,
) -> AppResult<HttpResponse> {
    let message_id = parse_message_id(&id)?;

    if !state.store.mark_read(message_id).await? {
        return Err(AppError::NotFound);
    }

    info!(%message_id, "message marked as read");
    Ok(HttpResponse::Ok().json(StatusResponse {
        status: "Message marked as read".into(),
    }))
}

/// Conditional `sent → delivered`. Rows already `delivered` or `read` are
/// left alone and still answer `200`; `updated` says whether anything changed.
#[put("/messages/{id}/delivered")]
pub async fn mark_delivered(
    state: web::Data<AppState>,
    id: web::Path<String>,
) -> AppResult<HttpResponse> {
    let updated = match Uuid::parse_str(&id) {
        Ok(message_id) => state.store.mark_delivered(message_id).await?,
        Err(_) => false,
    };

    Ok(HttpResponse::Ok().json(DeliveredResponse {
        status: "Delivery status processed".into(),
        updated,
    }))
}

#[delete("/messages/{id}")]
pub async fn delete_message(
    state: web::Data<AppState>,
    id: web::Path<String>,
) -> AppResult<HttpResponse> {
    let message_id = parse_message_id(&id)?;

    if !state.store.delete(message_id).await? {
        return Err(AppError::NotFound);
    }

    info!(%message_id, "message deleted");
    Ok(HttpResponse::Ok().json(StatusResponse {
        status: "Message deleted".into(),
    }))
}
