use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::courier::GeoPoint;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    Pending,
    Assigned,
    PickedUp,
    InTransit,
    Delivered,
    Cancelled,
}

/// Outcome of checking a requested status change against the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Apply,
    Unchanged,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "PENDING",
            DeliveryStatus::Assigned => "ASSIGNED",
            DeliveryStatus::PickedUp => "PICKED_UP",
            DeliveryStatus::InTransit => "IN_TRANSIT",
            DeliveryStatus::Delivered => "DELIVERED",
            DeliveryStatus::Cancelled => "CANCELLED",
        }
    }

    /// A courier holding a delivery in one of these states is OCCUPIED.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            DeliveryStatus::Assigned | DeliveryStatus::PickedUp | DeliveryStatus::InTransit
        )
    }

    /// Re-applying the current status is a no-op. Everything else must be a
    /// forward edge of the lifecycle; cancellation only leaves PENDING.
    /// Couriers may confirm delivery before the automatic IN_TRANSIT step.
    pub fn check_transition(self, next: DeliveryStatus) -> Result<Transition, AppError> {
        use DeliveryStatus::*;

        if self == next {
            return Ok(Transition::Unchanged);
        }

        match (self, next) {
            (Pending, Assigned)
            | (Pending, Cancelled)
            | (Assigned, PickedUp)
            | (PickedUp, InTransit)
            | (PickedUp, Delivered)
            | (InTransit, Delivered) => Ok(Transition::Apply),
            (from, to) => Err(AppError::Conflict(format!(
                "cannot move delivery from {from} to {to}"
            ))),
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    CashOnDelivery,
    Prepaid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub address: String,
    pub contact: String,
    pub coordinates: GeoPoint,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delivery {
    pub order_id: Uuid,
    pub courier_id: Option<Uuid>,
    pub restaurant_id: Uuid,
    pub customer_id: Uuid,
    pub pickup: Location,
    pub dropoff: Location,
    pub total_amount: f64,
    pub delivery_fee: f64,
    pub payment_method: PaymentMethod,
    pub status: DeliveryStatus,
    pub rating: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub picked_up_at: Option<DateTime<Utc>>,
    /// When a PICKED_UP delivery is due to move to IN_TRANSIT on its own.
    pub transit_due_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::{DeliveryStatus, Transition};
    use crate::error::AppError;

    #[test]
    fn reapplying_current_status_is_a_no_op() {
        for status in [
            DeliveryStatus::Pending,
            DeliveryStatus::PickedUp,
            DeliveryStatus::Delivered,
            DeliveryStatus::Cancelled,
        ] {
            assert_eq!(
                status.check_transition(status).unwrap(),
                Transition::Unchanged
            );
        }
    }

    #[test]
    fn forward_edges_are_applied() {
        assert_eq!(
            DeliveryStatus::Pending
                .check_transition(DeliveryStatus::Assigned)
                .unwrap(),
            Transition::Apply
        );
        assert_eq!(
            DeliveryStatus::PickedUp
                .check_transition(DeliveryStatus::Delivered)
                .unwrap(),
            Transition::Apply
        );
    }

    #[test]
    fn moving_backwards_is_rejected() {
        let err = DeliveryStatus::InTransit
            .check_transition(DeliveryStatus::Assigned)
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[test]
    fn cancellation_only_leaves_pending() {
        assert!(
            DeliveryStatus::Assigned
                .check_transition(DeliveryStatus::Cancelled)
                .is_err()
        );
        assert!(
            DeliveryStatus::Cancelled
                .check_transition(DeliveryStatus::Assigned)
                .is_err()
        );
    }

    #[test]
    fn status_serializes_in_screaming_case() {
        let json = serde_json::to_string(&DeliveryStatus::InTransit).unwrap();
        assert_eq!(json, "\"IN_TRANSIT\"");
    }
}
