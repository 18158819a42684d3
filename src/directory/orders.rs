use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{GeoPoint, PaymentMethod};

/// Order as returned by the order service. Commercial fields are optional on
/// the wire and validated before a delivery is built from them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRecord {
    pub id: Uuid,
    pub restaurant_id: Uuid,
    pub customer_id: Uuid,
    pub address_id: Uuid,
    pub total_amount: Option<f64>,
    pub delivery_fee: Option<f64>,
    pub payment_method: Option<PaymentMethod>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestaurantRecord {
    pub id: Uuid,
    pub name: String,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub location: Option<GeoPoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressRecord {
    pub id: Uuid,
    pub line: Option<String>,
    pub contact: Option<String>,
    pub location: Option<GeoPoint>,
}

#[async_trait]
pub trait OrderDirectory: Send + Sync {
    async fn order(&self, order_id: Uuid) -> Result<OrderRecord, AppError>;
    async fn restaurant(&self, restaurant_id: Uuid) -> Result<RestaurantRecord, AppError>;
    async fn address(&self, address_id: Uuid) -> Result<AddressRecord, AppError>;
}

#[derive(Default)]
pub struct InMemoryDirectory {
    orders: DashMap<Uuid, OrderRecord>,
    restaurants: DashMap<Uuid, RestaurantRecord>,
    addresses: DashMap<Uuid, AddressRecord>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_order(&self, order: OrderRecord) {
        self.orders.insert(order.id, order);
    }

    pub fn put_restaurant(&self, restaurant: RestaurantRecord) {
        self.restaurants.insert(restaurant.id, restaurant);
    }

    pub fn put_address(&self, address: AddressRecord) {
        self.addresses.insert(address.id, address);
    }
}

#[async_trait]
impl OrderDirectory for InMemoryDirectory {
    async fn order(&self, order_id: Uuid) -> Result<OrderRecord, AppError> {
        self.orders
            .get(&order_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))
    }

    async fn restaurant(&self, restaurant_id: Uuid) -> Result<RestaurantRecord, AppError> {
        self.restaurants
            .get(&restaurant_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AppError::NotFound(format!("restaurant {restaurant_id} not found")))
    }

    async fn address(&self, address_id: Uuid) -> Result<AddressRecord, AppError> {
        self.addresses
            .get(&address_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AppError::NotFound(format!("address {address_id} not found")))
    }
}
