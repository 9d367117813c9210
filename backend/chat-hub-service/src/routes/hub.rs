use crate::error::AppError;
use crate::state::AppState;
use actix_web::{get, web, HttpResponse};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct SubscriberCountResponse {
    pub conversation_id: i64,
    pub subscribers: usize,
}

/// Sizes of the conversation and user indexes.
#[get("/api/hub/stats")]
pub async fn hub_stats(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(state.registry.stats().await)
}

#[get("/api/hub/conversations/{id}/subscribers")]
pub async fn conversation_subscribers(
    state: web::Data<AppState>,
    conversation_id: web::Path<i64>,
) -> Result<HttpResponse, AppError> {
    let conversation_id = conversation_id.into_inner();
    if conversation_id < 0 {
        return Err(AppError::BadRequest("invalid conversation id".into()));
    }

    let subscribers = state.registry.subscriber_count(conversation_id).await;
    Ok(HttpResponse::Ok().json(SubscriberCountResponse {
        conversation_id,
        subscribers,
    }))
}
