use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{Delivery, DeliveryStatus, Transition};

/// Change applied to a single delivery record under the store's lock. It
/// reports whether anything changed so no-op writes can be skipped.
pub type DeliveryMutation = Box<dyn FnOnce(&mut Delivery) -> Result<Transition, AppError> + Send>;

#[derive(Debug, Clone)]
pub struct Updated {
    pub delivery: Delivery,
    pub transition: Transition,
}

/// Document store for delivery records, keyed by order reference.
#[async_trait]
pub trait DeliveryStore: Send + Sync {
    async fn insert(&self, delivery: Delivery) -> Result<(), AppError>;
    async fn get(&self, order_id: Uuid) -> Result<Option<Delivery>, AppError>;
    async fn update(&self, order_id: Uuid, mutation: DeliveryMutation) -> Result<Updated, AppError>;
    async fn by_courier(&self, courier_id: Uuid) -> Result<Vec<Delivery>, AppError>;
    /// PICKED_UP deliveries whose automatic IN_TRANSIT time has passed.
    async fn due_for_transit(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, AppError>;
}

#[derive(Default)]
pub struct InMemoryDeliveryStore {
    deliveries: DashMap<Uuid, Delivery>,
}

impl InMemoryDeliveryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.deliveries.is_empty()
    }
}

#[async_trait]
impl DeliveryStore for InMemoryDeliveryStore {
    async fn insert(&self, delivery: Delivery) -> Result<(), AppError> {
        match self.deliveries.entry(delivery.order_id) {
            Entry::Occupied(_) => Err(AppError::Conflict(format!(
                "delivery for order {} already exists",
                delivery.order_id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(delivery);
                Ok(())
            }
        }
    }

    async fn get(&self, order_id: Uuid) -> Result<Option<Delivery>, AppError> {
        Ok(self.deliveries.get(&order_id).map(|entry| entry.value().clone()))
    }

    async fn update(&self, order_id: Uuid, mutation: DeliveryMutation) -> Result<Updated, AppError> {
        let mut entry = self
            .deliveries
            .get_mut(&order_id)
            .ok_or_else(|| AppError::NotFound(format!("delivery for order {order_id} not found")))?;

        let mut draft = entry.value().clone();
        let transition = mutation(&mut draft)?;

        if transition == Transition::Apply {
            draft.updated_at = Utc::now();
            *entry.value_mut() = draft;
        }

        Ok(Updated {
            delivery: entry.value().clone(),
            transition,
        })
    }

    async fn by_courier(&self, courier_id: Uuid) -> Result<Vec<Delivery>, AppError> {
        Ok(self
            .deliveries
            .iter()
            .filter(|entry| entry.value().courier_id == Some(courier_id))
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn due_for_transit(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, AppError> {
        Ok(self
            .deliveries
            .iter()
            .filter(|entry| {
                let delivery = entry.value();
                delivery.status == DeliveryStatus::PickedUp
                    && delivery.transit_due_at.is_some_and(|due| due <= now)
            })
            .map(|entry| *entry.key())
            .collect())
    }
}
