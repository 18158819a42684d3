use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, put};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use tracing::info;

use crate::api::rest::auth::CourierSession;
use crate::directory::CourierProfileStore;
use crate::error::AppError;
use crate::mediator::CourierStatusPort;
use crate::models::{CourierProfile, CourierStatus, GeoPoint};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/couriers/me", get(get_profile))
        .route("/couriers/me/status", put(update_status))
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: CourierStatus,
    pub location: Option<GeoPoint>,
}

async fn get_profile(
    State(state): State<Arc<AppState>>,
    CourierSession(courier_id): CourierSession,
) -> Result<Json<CourierProfile>, AppError> {
    Ok(Json(state.couriers.get(courier_id).await?))
}

/// Courier availability toggle. OCCUPIED is owned by dispatch and can
/// neither be requested nor left through this endpoint.
async fn update_status(
    State(state): State<Arc<AppState>>,
    CourierSession(courier_id): CourierSession,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<CourierProfile>, AppError> {
    if payload.status == CourierStatus::Occupied {
        return Err(AppError::InvalidArgument(
            "status must be ONLINE or OFFLINE".to_string(),
        ));
    }
    if payload.location.is_some_and(|location| !location.is_valid()) {
        return Err(AppError::InvalidArgument(
            "coordinates out of range".to_string(),
        ));
    }

    state
        .mediator
        .transition_status(
            courier_id,
            &[CourierStatus::Online, CourierStatus::Offline],
            payload.status,
        )
        .await?;

    match (payload.status, payload.location) {
        (CourierStatus::Offline, _) => state.presence.remove_driver(courier_id),
        (CourierStatus::Online, Some(location)) => {
            state.presence.add_available_driver(courier_id, location);
            state.mediator.record_location(courier_id, location).await?;
        }
        _ => {}
    }

    info!(courier_id = %courier_id, status = ?payload.status, "courier availability changed");
    Ok(Json(state.couriers.get(courier_id).await?))
}
