use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::rest::auth::{AuthSession, CourierSession, CustomerSession, ServiceAccess};
use crate::directory::Role;
use crate::dispatch::earnings::Earnings;
use crate::dispatch::Page;
use crate::error::AppError;
use crate::models::{Delivery, DeliveryStatus};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/deliveries/delivered", post(mark_delivered))
        .route("/deliveries/history", get(history))
        .route("/deliveries/earnings", get(earnings))
        .route("/deliveries/:order_id", get(get_delivery))
        .route("/deliveries/:order_id/cancel", post(cancel_delivery))
        .route("/deliveries/:order_id/rating", post(rate_delivery))
        .route("/deliveries/:order_id/dispatch", post(redispatch))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkDeliveredRequest {
    pub order_id: Uuid,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkDeliveredResponse {
    pub status: DeliveryStatus,
    pub delivered_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Deserialize)]
pub struct EarningsQuery {
    pub period: Option<String>,
}

#[derive(Deserialize)]
pub struct RatingRequest {
    pub rating: u8,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchResponse {
    pub order_id: Uuid,
    pub offered_to: usize,
}

async fn mark_delivered(
    State(state): State<Arc<AppState>>,
    CourierSession(courier_id): CourierSession,
    Json(payload): Json<MarkDeliveredRequest>,
) -> Result<Json<MarkDeliveredResponse>, AppError> {
    let delivery = state
        .coordinator
        .mark_delivered(courier_id, payload.order_id)
        .await?;

    Ok(Json(MarkDeliveredResponse {
        status: delivery.status,
        delivered_at: delivery.delivered_at,
    }))
}

async fn history(
    State(state): State<Arc<AppState>>,
    CourierSession(courier_id): CourierSession,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Page<Delivery>>, AppError> {
    let page = state
        .coordinator
        .get_partner_deliveries(
            courier_id,
            query.page.unwrap_or(1),
            query.limit.unwrap_or(10),
        )
        .await?;

    Ok(Json(page))
}

async fn earnings(
    State(state): State<Arc<AppState>>,
    CourierSession(courier_id): CourierSession,
    Query(query): Query<EarningsQuery>,
) -> Result<Json<Earnings>, AppError> {
    let period = query
        .period
        .ok_or_else(|| AppError::InvalidArgument("period is required".to_string()))?;

    Ok(Json(
        state
            .coordinator
            .get_earnings_by_period(courier_id, &period)
            .await?,
    ))
}

/// Visible to the delivery's courier and customer only.
async fn get_delivery(
    State(state): State<Arc<AppState>>,
    AuthSession(session): AuthSession,
    Path(order_id): Path<Uuid>,
) -> Result<Json<Delivery>, AppError> {
    let delivery = state.coordinator.get_delivery(order_id).await?;

    let is_party = match session.role {
        Role::Courier => delivery.courier_id == Some(session.party_id),
        Role::Customer => delivery.customer_id == session.party_id,
    };
    if !is_party {
        return Err(AppError::Unauthorized(format!(
            "order {order_id} belongs to another party"
        )));
    }

    Ok(Json(delivery))
}

async fn cancel_delivery(
    State(state): State<Arc<AppState>>,
    CustomerSession(customer_id): CustomerSession,
    Path(order_id): Path<Uuid>,
) -> Result<Json<Delivery>, AppError> {
    Ok(Json(
        state
            .coordinator
            .cancel_delivery(customer_id, order_id)
            .await?,
    ))
}

async fn rate_delivery(
    State(state): State<Arc<AppState>>,
    CustomerSession(customer_id): CustomerSession,
    Path(order_id): Path<Uuid>,
    Json(payload): Json<RatingRequest>,
) -> Result<Json<Delivery>, AppError> {
    Ok(Json(
        state
            .coordinator
            .rate_delivery(customer_id, order_id, payload.rating)
            .await?,
    ))
}

/// Operator endpoint: offers a still-PENDING delivery again.
async fn redispatch(
    State(state): State<Arc<AppState>>,
    _service: ServiceAccess,
    Path(order_id): Path<Uuid>,
) -> Result<Json<DispatchResponse>, AppError> {
    let offered = state.coordinator.redispatch(order_id).await?;
    Ok(Json(DispatchResponse {
        order_id,
        offered_to: offered.len(),
    }))
}
