//! Delivery records and their lifecycle: creation from confirmed orders,
//! courier matching and offer fan-out, status transitions, and the courier
//! facing history and earnings views.

pub mod earnings;
pub mod housekeeping;
pub mod store;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::directory::{
    AddressRecord, CourierProfileStore, OrderDirectory, OrderRecord, RestaurantRecord, Role,
};
use crate::error::AppError;
use crate::hub::ConnectionHub;
use crate::models::messages::{DeliveryOffer, ServerMessage};
use crate::models::{CourierStatus, Delivery, DeliveryStatus, Location, Transition};
use crate::observability::metrics::Metrics;
use crate::presence::PresenceRegistry;

use self::earnings::{sum_fees, Earnings, EarningsPeriod};
use self::store::{DeliveryStore, Updated};

#[derive(Debug, Clone)]
pub struct DispatchPolicy {
    pub radius_km: f64,
    pub candidate_count: usize,
    pub transit_delay: Duration,
    pub history_max_limit: u32,
    pub currency: String,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            radius_km: 5.0,
            candidate_count: 10,
            transit_delay: Duration::from_secs(120),
            history_max_limit: 100,
            currency: "USD".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub data: Vec<T>,
    pub total: usize,
    pub page: u32,
    pub limit: u32,
}

pub struct DispatchCoordinator {
    deliveries: Arc<dyn DeliveryStore>,
    directory: Arc<dyn OrderDirectory>,
    couriers: Arc<dyn CourierProfileStore>,
    presence: Arc<PresenceRegistry>,
    hub: Arc<ConnectionHub>,
    policy: DispatchPolicy,
    metrics: Metrics,
}

impl DispatchCoordinator {
    pub fn new(
        deliveries: Arc<dyn DeliveryStore>,
        directory: Arc<dyn OrderDirectory>,
        couriers: Arc<dyn CourierProfileStore>,
        presence: Arc<PresenceRegistry>,
        hub: Arc<ConnectionHub>,
        policy: DispatchPolicy,
        metrics: Metrics,
    ) -> Self {
        Self {
            deliveries,
            directory,
            couriers,
            presence,
            hub,
            policy,
            metrics,
        }
    }

    pub fn policy(&self) -> &DispatchPolicy {
        &self.policy
    }

    /// Builds a PENDING delivery for a confirmed order and offers it to the
    /// nearest couriers. A replayed order whose delivery already exists is
    /// re-offered while still PENDING and otherwise left alone.
    pub async fn create_delivery(&self, order_id: Uuid) -> Result<Delivery, AppError> {
        if let Some(existing) = self.deliveries.get(order_id).await? {
            info!(order_id = %order_id, status = %existing.status, "delivery already exists");
            if existing.status == DeliveryStatus::Pending {
                self.try_assign(&existing).await;
            }
            return Ok(existing);
        }

        let order = self.directory.order(order_id).await?;
        let restaurant = self.directory.restaurant(order.restaurant_id).await?;
        let address = self.directory.address(order.address_id).await?;

        let delivery = build_delivery(&order, &restaurant, &address, Utc::now())?;
        self.deliveries.insert(delivery.clone()).await?;
        self.metrics.deliveries_created_total.inc();

        info!(
            order_id = %order_id,
            restaurant_id = %delivery.restaurant_id,
            customer_id = %delivery.customer_id,
            "delivery created"
        );

        self.try_assign(&delivery).await;
        Ok(delivery)
    }

    async fn try_assign(&self, delivery: &Delivery) {
        match self.assign_delivery_partner(delivery).await {
            Ok(_) => {}
            Err(AppError::NoAvailableCouriers) => {
                warn!(order_id = %delivery.order_id, "no reachable courier; delivery stays pending");
            }
            Err(err) => {
                error!(order_id = %delivery.order_id, error = %err, "assignment attempt failed");
            }
        }
    }

    /// Offers the delivery to up to N live couriers around the pickup point.
    /// Returns the couriers the offer reached; acceptance happens later on
    /// their channels.
    pub async fn assign_delivery_partner(&self, delivery: &Delivery) -> Result<Vec<Uuid>, AppError> {
        if delivery.status != DeliveryStatus::Pending {
            return Err(AppError::Conflict(format!(
                "delivery for order {} is {}, not PENDING",
                delivery.order_id, delivery.status
            )));
        }

        let start = Instant::now();
        let candidates = self.presence.find_nearest_drivers(
            &delivery.pickup.coordinates,
            self.policy.radius_km,
            self.policy.candidate_count,
        );

        let candidate_ids: Vec<Uuid> = candidates.iter().map(|hit| hit.courier_id).collect();
        let reached = if candidate_ids.is_empty() {
            0
        } else {
            self.hub
                .broadcast_request(&candidate_ids, &DeliveryOffer::from(delivery))
        };

        let outcome = if reached == 0 { "no_candidates" } else { "offered" };
        self.metrics
            .dispatch_attempts_total
            .with_label_values(&[outcome])
            .inc();
        self.metrics
            .dispatch_latency_seconds
            .with_label_values(&[outcome])
            .observe(start.elapsed().as_secs_f64());

        if reached == 0 {
            debug!(
                order_id = %delivery.order_id,
                candidates = candidate_ids.len(),
                "no candidate reachable on a live channel"
            );
            return Err(AppError::NoAvailableCouriers);
        }

        Ok(candidate_ids)
    }

    /// Re-runs matching for a delivery that is still PENDING.
    pub async fn redispatch(&self, order_id: Uuid) -> Result<Vec<Uuid>, AppError> {
        let delivery = self.get_delivery(order_id).await?;
        self.assign_delivery_partner(&delivery).await
    }

    pub async fn get_delivery(&self, order_id: Uuid) -> Result<Delivery, AppError> {
        self.deliveries
            .get(order_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("delivery for order {order_id} not found")))
    }

    fn record_transition(&self, updated: &Updated) {
        if updated.transition == Transition::Apply {
            self.metrics
                .delivery_transitions_total
                .with_label_values(&[updated.delivery.status.as_str()])
                .inc();
            info!(
                order_id = %updated.delivery.order_id,
                status = %updated.delivery.status,
                "delivery status changed"
            );
        }
    }

    /// PENDING -> ASSIGNED for the courier that won the claim. Re-assigning
    /// the same courier is a no-op; any other courier is a conflict.
    pub async fn mark_assigned(&self, order_id: Uuid, courier_id: Uuid) -> Result<Delivery, AppError> {
        let now = Utc::now();
        let updated = self
            .deliveries
            .update(
                order_id,
                Box::new(move |delivery: &mut Delivery| {
                    let transition = delivery.status.check_transition(DeliveryStatus::Assigned)?;
                    match transition {
                        Transition::Unchanged if delivery.courier_id != Some(courier_id) => {
                            Err(AppError::Conflict(format!(
                                "order {order_id} is assigned to another courier"
                            )))
                        }
                        Transition::Unchanged => Ok(Transition::Unchanged),
                        Transition::Apply => {
                            delivery.status = DeliveryStatus::Assigned;
                            delivery.courier_id = Some(courier_id);
                            delivery.assigned_at = Some(now);
                            Ok(Transition::Apply)
                        }
                    }
                }),
            )
            .await?;

        self.record_transition(&updated);
        Ok(updated.delivery)
    }

    /// ASSIGNED -> PICKED_UP on restaurant handover. Schedules the automatic
    /// IN_TRANSIT step by stamping its due time on the record.
    pub async fn mark_picked_up(&self, order_id: Uuid) -> Result<Delivery, AppError> {
        let now = Utc::now();
        let due = chrono::Duration::from_std(self.policy.transit_delay)
            .map(|delay| now + delay)
            .map_err(|err| AppError::InvalidArgument(format!("transit delay out of range: {err}")))?;

        let updated = self
            .deliveries
            .update(
                order_id,
                Box::new(move |delivery: &mut Delivery| {
                    let transition = delivery.status.check_transition(DeliveryStatus::PickedUp)?;
                    if transition == Transition::Apply {
                        delivery.status = DeliveryStatus::PickedUp;
                        delivery.picked_up_at = Some(now);
                        delivery.transit_due_at = Some(due);
                    }
                    Ok(transition)
                }),
            )
            .await?;

        self.record_transition(&updated);
        Ok(updated.delivery)
    }

    /// PICKED_UP -> IN_TRANSIT. When `courier_id` is given the caller must be
    /// the assigned courier.
    pub async fn mark_in_transit(
        &self,
        order_id: Uuid,
        courier_id: Option<Uuid>,
    ) -> Result<Delivery, AppError> {
        let updated = self
            .deliveries
            .update(
                order_id,
                Box::new(move |delivery: &mut Delivery| {
                    ensure_assigned_to(delivery, courier_id)?;
                    let transition = delivery.status.check_transition(DeliveryStatus::InTransit)?;
                    if transition == Transition::Apply {
                        delivery.status = DeliveryStatus::InTransit;
                        delivery.transit_due_at = None;
                    }
                    Ok(transition)
                }),
            )
            .await?;

        self.record_transition(&updated);
        Ok(updated.delivery)
    }

    /// Courier-confirmed delivery. Frees the courier, ends live tracking and
    /// tells the customer.
    pub async fn mark_delivered(&self, courier_id: Uuid, order_id: Uuid) -> Result<Delivery, AppError> {
        let now = Utc::now();
        let updated = self
            .deliveries
            .update(
                order_id,
                Box::new(move |delivery: &mut Delivery| {
                    ensure_assigned_to(delivery, Some(courier_id))?;
                    let transition = delivery.status.check_transition(DeliveryStatus::Delivered)?;
                    if transition == Transition::Apply {
                        delivery.status = DeliveryStatus::Delivered;
                        delivery.delivered_at = Some(now);
                        delivery.transit_due_at = None;
                    }
                    Ok(transition)
                }),
            )
            .await?;

        self.record_transition(&updated);
        self.finish_delivery(courier_id, &updated).await?;
        Ok(updated.delivery)
    }

    /// Side effects of a DELIVERED record. Safe to repeat: a confirmation
    /// retried after a failure here completes whatever was left undone.
    async fn finish_delivery(&self, courier_id: Uuid, updated: &Updated) -> Result<(), AppError> {
        let delivery = &updated.delivery;
        let still_busy = self
            .deliveries
            .by_courier(courier_id)
            .await?
            .iter()
            .any(|other| other.status.is_active());
        if still_busy {
            return Ok(());
        }

        match self
            .couriers
            .transition_status(courier_id, &[CourierStatus::Occupied], CourierStatus::Online)
            .await
        {
            Ok(_) | Err(AppError::Conflict(_)) => {}
            Err(err) => {
                error!(order_id = %delivery.order_id, courier_id = %courier_id, error = %err, "failed to free courier after delivery");
                return Err(err);
            }
        }

        let unbound = self.hub.unbind_tracking(&courier_id).is_some();
        if updated.transition == Transition::Apply || unbound {
            self.hub.send(
                Role::Customer,
                delivery.customer_id,
                ServerMessage::DeliveryCompleted {
                    order_id: delivery.order_id,
                    delivered_at: delivery.delivered_at.unwrap_or(delivery.updated_at),
                },
            );
        }
        Ok(())
    }

    /// PENDING -> CANCELLED. Requested by the delivery's customer.
    pub async fn cancel_delivery(&self, customer_id: Uuid, order_id: Uuid) -> Result<Delivery, AppError> {
        let updated = self
            .deliveries
            .update(
                order_id,
                Box::new(move |delivery: &mut Delivery| {
                    if delivery.customer_id != customer_id {
                        return Err(AppError::Unauthorized(format!(
                            "order {order_id} belongs to another customer"
                        )));
                    }
                    let transition = delivery.status.check_transition(DeliveryStatus::Cancelled)?;
                    if transition == Transition::Apply {
                        delivery.status = DeliveryStatus::Cancelled;
                    }
                    Ok(transition)
                }),
            )
            .await?;

        self.record_transition(&updated);
        Ok(updated.delivery)
    }

    pub async fn rate_delivery(
        &self,
        customer_id: Uuid,
        order_id: Uuid,
        rating: u8,
    ) -> Result<Delivery, AppError> {
        if !(1..=5).contains(&rating) {
            return Err(AppError::InvalidArgument(
                "rating must be between 1 and 5".to_string(),
            ));
        }

        let updated = self
            .deliveries
            .update(
                order_id,
                Box::new(move |delivery: &mut Delivery| {
                    if delivery.customer_id != customer_id {
                        return Err(AppError::Unauthorized(format!(
                            "order {order_id} belongs to another customer"
                        )));
                    }
                    if delivery.status != DeliveryStatus::Delivered {
                        return Err(AppError::Conflict(format!(
                            "order {order_id} is {}, only delivered orders can be rated",
                            delivery.status
                        )));
                    }
                    if delivery.rating == rating {
                        return Ok(Transition::Unchanged);
                    }
                    delivery.rating = rating;
                    Ok(Transition::Apply)
                }),
            )
            .await?;

        Ok(updated.delivery)
    }

    /// Moves every PICKED_UP delivery whose transit time has passed.
    pub async fn complete_due_transits(&self, now: DateTime<Utc>) -> Result<usize, AppError> {
        let due = self.deliveries.due_for_transit(now).await?;
        let mut moved = 0;

        for order_id in due {
            match self.mark_in_transit(order_id, None).await {
                Ok(_) => moved += 1,
                Err(AppError::Conflict(reason)) => {
                    debug!(order_id = %order_id, reason = %reason, "skipping transit step");
                }
                Err(err) => return Err(err),
            }
        }

        Ok(moved)
    }

    pub async fn get_earnings_by_period(
        &self,
        courier_id: Uuid,
        period: &str,
    ) -> Result<Earnings, AppError> {
        let period: EarningsPeriod = period.parse()?;
        self.earnings_at(courier_id, period, Utc::now()).await
    }

    pub async fn earnings_at(
        &self,
        courier_id: Uuid,
        period: EarningsPeriod,
        now: DateTime<Utc>,
    ) -> Result<Earnings, AppError> {
        let deliveries = self.deliveries.by_courier(courier_id).await?;
        Ok(Earnings {
            period,
            earnings: sum_fees(&deliveries, period, now),
            currency: self.policy.currency.clone(),
        })
    }

    /// Newest-first history. `limit` above the configured cap is clamped.
    pub async fn get_partner_deliveries(
        &self,
        courier_id: Uuid,
        page: i64,
        limit: i64,
    ) -> Result<Page<Delivery>, AppError> {
        if page < 1 {
            return Err(AppError::InvalidArgument("page must be a positive integer".to_string()));
        }
        if limit < 1 {
            return Err(AppError::InvalidArgument("limit must be a positive integer".to_string()));
        }

        let page = u32::try_from(page)
            .map_err(|_| AppError::InvalidArgument("page is too large".to_string()))?;
        let limit = limit.min(i64::from(self.policy.history_max_limit)) as u32;

        let mut deliveries = self.deliveries.by_courier(courier_id).await?;
        deliveries.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = deliveries.len();
        let offset = (page as usize - 1).saturating_mul(limit as usize);
        let data = deliveries
            .into_iter()
            .skip(offset)
            .take(limit as usize)
            .collect();

        Ok(Page {
            data,
            total,
            page,
            limit,
        })
    }
}

fn ensure_assigned_to(delivery: &Delivery, courier_id: Option<Uuid>) -> Result<(), AppError> {
    match courier_id {
        Some(courier_id) if delivery.courier_id != Some(courier_id) => Err(AppError::Unauthorized(
            format!("order {} is not assigned to this courier", delivery.order_id),
        )),
        _ => Ok(()),
    }
}

/// Validates every field a PENDING record needs before anything is stored.
pub fn build_delivery(
    order: &OrderRecord,
    restaurant: &RestaurantRecord,
    address: &AddressRecord,
    now: DateTime<Utc>,
) -> Result<Delivery, AppError> {
    let mut missing = Vec::new();

    if order.total_amount.is_none() {
        missing.push("totalAmount");
    }
    if order.payment_method.is_none() {
        missing.push("paymentMethod");
    }
    if restaurant.address.is_none() {
        missing.push("restaurant.address");
    }
    if restaurant.location.is_none() {
        missing.push("restaurant.location");
    }
    if address.line.is_none() {
        missing.push("address.line");
    }
    if address.location.is_none() {
        missing.push("address.location");
    }

    let (
        Some(total_amount),
        Some(payment_method),
        Some(pickup_address),
        Some(pickup_coordinates),
        Some(dropoff_address),
        Some(dropoff_coordinates),
    ) = (
        order.total_amount,
        order.payment_method,
        restaurant.address.clone(),
        restaurant.location,
        address.line.clone(),
        address.location,
    )
    else {
        return Err(AppError::InvalidArgument(format!(
            "order {} is missing {}",
            order.id,
            missing.join(", ")
        )));
    };

    if !pickup_coordinates.is_valid() || !dropoff_coordinates.is_valid() {
        return Err(AppError::InvalidArgument(format!(
            "order {} has out-of-range coordinates",
            order.id
        )));
    }

    Ok(Delivery {
        order_id: order.id,
        courier_id: None,
        restaurant_id: restaurant.id,
        customer_id: order.customer_id,
        pickup: Location {
            address: pickup_address,
            contact: restaurant.phone.clone().unwrap_or_default(),
            coordinates: pickup_coordinates,
        },
        dropoff: Location {
            address: dropoff_address,
            contact: address.contact.clone().unwrap_or_default(),
            coordinates: dropoff_coordinates,
        },
        total_amount,
        delivery_fee: order.delivery_fee.unwrap_or(0.0),
        payment_method,
        status: DeliveryStatus::Pending,
        rating: 0,
        created_at: now,
        updated_at: now,
        assigned_at: None,
        picked_up_at: None,
        transit_due_at: None,
        delivered_at: None,
    })
}
