use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::Json;
use axum::Router;
use serde::Serialize;

use crate::api::rest::auth::ServiceAccess;
use crate::error::AppError;
use crate::models::events::OrderEvent;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/events", post(publish_event))
}

#[derive(Serialize)]
struct PublishResponse {
    offset: u64,
}

/// Appends an order-lifecycle event to the ingest log.
async fn publish_event(
    State(state): State<Arc<AppState>>,
    _service: ServiceAccess,
    Json(event): Json<OrderEvent>,
) -> Result<(StatusCode, Json<PublishResponse>), AppError> {
    let offset = state.events.publish(event)?;
    Ok((StatusCode::ACCEPTED, Json(PublishResponse { offset })))
}
