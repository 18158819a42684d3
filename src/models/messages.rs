use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::courier::GeoPoint;
use crate::models::delivery::{Delivery, Location, PaymentMethod};

/// Frames sent by courier and customer clients over their live channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientMessage {
    AvailableLocationUpdate(GeoPoint),
    OccupiedLocationUpdate(GeoPoint),
    #[serde(rename_all = "camelCase")]
    DeliveryResponseAccept { order_id: Uuid, customer_id: Uuid },
    #[serde(rename_all = "camelCase")]
    TransitStarted { order_id: Uuid },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryOffer {
    pub order_id: Uuid,
    pub customer_id: Uuid,
    pub pickup_location: Location,
    pub delivery_location: Location,
    pub total_order_amount: f64,
    pub delivery_fee: f64,
    pub payment_method: PaymentMethod,
}

impl From<&Delivery> for DeliveryOffer {
    fn from(delivery: &Delivery) -> Self {
        Self {
            order_id: delivery.order_id,
            customer_id: delivery.customer_id,
            pickup_location: delivery.pickup.clone(),
            delivery_location: delivery.dropoff.clone(),
            total_order_amount: delivery.total_amount,
            delivery_fee: delivery.delivery_fee,
            payment_method: delivery.payment_method,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerMessage {
    NewDelivery(DeliveryOffer),
    #[serde(rename_all = "camelCase")]
    Acknowledgement { order_id: Uuid, accepted: bool },
    TrackingUpdate(GeoPoint),
    #[serde(rename_all = "camelCase")]
    DeliveryCompleted {
        order_id: Uuid,
        delivered_at: DateTime<Utc>,
    },
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use uuid::Uuid;

    use super::{ClientMessage, ServerMessage};
    use crate::models::GeoPoint;

    #[test]
    fn accept_frame_parses_camel_case_fields() {
        let order_id = Uuid::from_u128(7);
        let customer_id = Uuid::from_u128(8);
        let frame = json!({
            "event": "deliveryResponseAccept",
            "data": { "orderId": order_id, "customerId": customer_id }
        });

        let parsed: ClientMessage = serde_json::from_value(frame).unwrap();
        assert_eq!(
            parsed,
            ClientMessage::DeliveryResponseAccept {
                order_id,
                customer_id
            }
        );
    }

    #[test]
    fn location_update_frame_parses() {
        let frame = json!({
            "event": "availableLocationUpdate",
            "data": { "latitude": 12.97, "longitude": 77.59 }
        });

        let parsed: ClientMessage = serde_json::from_value(frame).unwrap();
        assert_eq!(
            parsed,
            ClientMessage::AvailableLocationUpdate(GeoPoint::new(12.97, 77.59))
        );
    }

    #[test]
    fn tracking_update_serializes_with_event_envelope() {
        let value =
            serde_json::to_value(ServerMessage::TrackingUpdate(GeoPoint::new(1.5, 2.5))).unwrap();
        assert_eq!(value["event"], "trackingUpdate");
        assert_eq!(value["data"]["latitude"], 1.5);
        assert_eq!(value["data"]["longitude"], 2.5);
    }
}
