//! Ports through which the live-channel side reaches courier state and
//! delivery state without holding the dispatch coordinator directly.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::directory::CourierProfileStore;
use crate::dispatch::DispatchCoordinator;
use crate::error::AppError;
use crate::models::{CourierStatus, Delivery, GeoPoint};

#[async_trait]
pub trait CourierStatusPort: Send + Sync {
    async fn find_status(&self, courier_id: Uuid) -> Result<CourierStatus, AppError>;
    async fn update_status(&self, courier_id: Uuid, status: CourierStatus) -> Result<(), AppError>;
    /// Compare-and-set on the courier's status; `Conflict` when the current
    /// status is not one of `from`.
    async fn transition_status(
        &self,
        courier_id: Uuid,
        from: &[CourierStatus],
        to: CourierStatus,
    ) -> Result<CourierStatus, AppError>;
    async fn record_location(&self, courier_id: Uuid, location: GeoPoint) -> Result<(), AppError>;
}

#[async_trait]
pub trait DeliveryAssigner: Send + Sync {
    /// Assigns the order to the courier. `customer_id` must match the record.
    async fn assigned_partner(
        &self,
        courier_id: Uuid,
        order_id: Uuid,
        customer_id: Uuid,
    ) -> Result<Delivery, AppError>;
    async fn transit_started(&self, courier_id: Uuid, order_id: Uuid) -> Result<Delivery, AppError>;
}

pub struct StatusMediator {
    couriers: Arc<dyn CourierProfileStore>,
    coordinator: Arc<DispatchCoordinator>,
}

impl StatusMediator {
    pub fn new(couriers: Arc<dyn CourierProfileStore>, coordinator: Arc<DispatchCoordinator>) -> Self {
        Self {
            couriers,
            coordinator,
        }
    }
}

#[async_trait]
impl CourierStatusPort for StatusMediator {
    async fn find_status(&self, courier_id: Uuid) -> Result<CourierStatus, AppError> {
        Ok(self.couriers.get(courier_id).await?.status)
    }

    async fn update_status(&self, courier_id: Uuid, status: CourierStatus) -> Result<(), AppError> {
        self.couriers.set_status(courier_id, status).await
    }

    async fn transition_status(
        &self,
        courier_id: Uuid,
        from: &[CourierStatus],
        to: CourierStatus,
    ) -> Result<CourierStatus, AppError> {
        Ok(self
            .couriers
            .transition_status(courier_id, from, to)
            .await?
            .status)
    }

    async fn record_location(&self, courier_id: Uuid, location: GeoPoint) -> Result<(), AppError> {
        self.couriers.set_last_location(courier_id, location).await
    }
}

#[async_trait]
impl DeliveryAssigner for StatusMediator {
    async fn assigned_partner(
        &self,
        courier_id: Uuid,
        order_id: Uuid,
        customer_id: Uuid,
    ) -> Result<Delivery, AppError> {
        // customer_id never changes after creation.
        let delivery = self.coordinator.get_delivery(order_id).await?;
        if delivery.customer_id != customer_id {
            return Err(AppError::InvalidArgument(format!(
                "order {order_id} does not belong to customer {customer_id}"
            )));
        }
        self.coordinator.mark_assigned(order_id, courier_id).await
    }

    async fn transit_started(&self, courier_id: Uuid, order_id: Uuid) -> Result<Delivery, AppError> {
        self.coordinator
            .mark_in_transit(order_id, Some(courier_id))
            .await
    }
}
