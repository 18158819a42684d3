//! Live channels to connected couriers and customers.
//!
//! The maps are process-local: a courier is only reachable for offers from
//! the instance holding its channel.

pub mod relay;

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::directory::{Role, Session};
use crate::models::messages::{DeliveryOffer, ServerMessage};
use crate::models::GeoPoint;
use crate::observability::metrics::Metrics;

pub use relay::TrackingRelay;

pub type Outbox = mpsc::UnboundedSender<ServerMessage>;

struct Connection {
    id: u64,
    outbox: Outbox,
}

pub struct ConnectionHub {
    couriers: DashMap<Uuid, Connection>,
    customers: DashMap<Uuid, Connection>,
    /// courier -> customer for deliveries in progress
    tracking: DashMap<Uuid, Uuid>,
    next_connection_id: AtomicU64,
    metrics: Metrics,
}

impl ConnectionHub {
    pub fn new(metrics: Metrics) -> Self {
        Self {
            couriers: DashMap::new(),
            customers: DashMap::new(),
            tracking: DashMap::new(),
            next_connection_id: AtomicU64::new(1),
            metrics,
        }
    }

    fn channels(&self, role: Role) -> &DashMap<Uuid, Connection> {
        match role {
            Role::Courier => &self.couriers,
            Role::Customer => &self.customers,
        }
    }

    fn refresh_gauge(&self, role: Role) {
        self.metrics
            .connected_parties
            .with_label_values(&[role.as_str()])
            .set(self.channels(role).len() as i64);
    }

    /// Registers a channel for an authenticated party. A newer connection
    /// replaces an older one for the same party.
    pub fn register(&self, session: Session, outbox: Outbox) -> u64 {
        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        self.channels(session.role)
            .insert(session.party_id, Connection { id, outbox });
        self.refresh_gauge(session.role);

        info!(party_id = %session.party_id, role = session.role.as_str(), connection_id = id, "channel connected");
        id
    }

    /// Removes the party's channel unless it has already been replaced by a
    /// newer connection.
    pub fn unregister(&self, session: Session, connection_id: u64) {
        let removed = self
            .channels(session.role)
            .remove_if(&session.party_id, |_, conn| conn.id == connection_id)
            .is_some();
        self.refresh_gauge(session.role);

        if removed {
            info!(party_id = %session.party_id, role = session.role.as_str(), connection_id, "channel disconnected");
        }
    }

    pub fn connected(&self, role: Role) -> usize {
        self.channels(role).len()
    }

    pub fn send(&self, role: Role, party_id: Uuid, message: ServerMessage) -> bool {
        let Some(conn) = self.channels(role).get(&party_id) else {
            debug!(party_id = %party_id, role = role.as_str(), "no live channel");
            return false;
        };
        conn.outbox.send(message).is_ok()
    }

    /// Pushes the offer to every candidate holding a live channel and returns
    /// how many were reached.
    pub fn broadcast_request(&self, candidates: &[Uuid], offer: &DeliveryOffer) -> usize {
        let reached = candidates
            .iter()
            .filter(|courier_id| {
                self.send(
                    Role::Courier,
                    **courier_id,
                    ServerMessage::NewDelivery(offer.clone()),
                )
            })
            .count();

        self.metrics.offers_sent_total.inc_by(reached as u64);
        info!(
            order_id = %offer.order_id,
            candidates = candidates.len(),
            reached,
            "delivery offer broadcast"
        );
        reached
    }

    pub fn bind_tracking(&self, courier_id: Uuid, customer_id: Uuid) {
        self.tracking.insert(courier_id, customer_id);
    }

    pub fn unbind_tracking(&self, courier_id: &Uuid) -> Option<Uuid> {
        self.tracking.remove(courier_id).map(|(_, customer_id)| customer_id)
    }

    pub fn tracked_customer(&self, courier_id: &Uuid) -> Option<Uuid> {
        self.tracking.get(courier_id).map(|entry| *entry.value())
    }

    pub fn active_trackings(&self) -> usize {
        self.tracking.len()
    }

    /// Forwards a courier position to the bound customer, if any.
    pub fn relay_tracking(&self, courier_id: Uuid, location: GeoPoint) -> bool {
        match self.tracked_customer(&courier_id) {
            Some(customer_id) => self.send(
                Role::Customer,
                customer_id,
                ServerMessage::TrackingUpdate(location),
            ),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;
    use uuid::Uuid;

    use super::ConnectionHub;
    use crate::directory::{Role, Session};
    use crate::models::messages::{DeliveryOffer, ServerMessage};
    use crate::models::{GeoPoint, Location, PaymentMethod};
    use crate::observability::metrics::Metrics;

    fn session(seed: u128, role: Role) -> Session {
        Session {
            party_id: Uuid::from_u128(seed),
            role,
        }
    }

    fn offer() -> DeliveryOffer {
        let location = Location {
            address: "1 Main St".to_string(),
            contact: "555-0100".to_string(),
            coordinates: GeoPoint::new(12.97, 77.59),
        };
        DeliveryOffer {
            order_id: Uuid::from_u128(99),
            customer_id: Uuid::from_u128(50),
            pickup_location: location.clone(),
            delivery_location: location,
            total_order_amount: 420.0,
            delivery_fee: 35.0,
            payment_method: PaymentMethod::Prepaid,
        }
    }

    #[test]
    fn broadcast_reaches_only_connected_candidates() {
        let hub = ConnectionHub::new(Metrics::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.register(session(1, Role::Courier), tx);

        let reached = hub.broadcast_request(&[Uuid::from_u128(1), Uuid::from_u128(2)], &offer());

        assert_eq!(reached, 1);
        assert!(matches!(rx.try_recv(), Ok(ServerMessage::NewDelivery(_))));
    }

    #[test]
    fn stale_disconnect_keeps_newer_connection() {
        let hub = ConnectionHub::new(Metrics::new());
        let courier = session(1, Role::Courier);
        let (old_tx, _old_rx) = mpsc::unbounded_channel();
        let (new_tx, _new_rx) = mpsc::unbounded_channel();

        let old_id = hub.register(courier, old_tx);
        let new_id = hub.register(courier, new_tx);
        hub.unregister(courier, old_id);
        assert_eq!(hub.connected(Role::Courier), 1);
        assert!(hub.send(Role::Courier, courier.party_id, ServerMessage::Error {
            message: "ping".to_string(),
        }));

        hub.unregister(courier, new_id);
        assert_eq!(hub.connected(Role::Courier), 0);
    }

    #[test]
    fn relay_goes_to_bound_customer_only() {
        let hub = ConnectionHub::new(Metrics::new());
        let customer = session(50, Role::Customer);
        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.register(customer, tx);

        let courier_id = Uuid::from_u128(1);
        assert!(!hub.relay_tracking(courier_id, GeoPoint::new(1.0, 2.0)));

        hub.bind_tracking(courier_id, customer.party_id);
        assert!(hub.relay_tracking(courier_id, GeoPoint::new(1.0, 2.0)));
        assert_eq!(
            rx.try_recv().unwrap(),
            ServerMessage::TrackingUpdate(GeoPoint::new(1.0, 2.0))
        );

        assert_eq!(hub.unbind_tracking(&courier_id), Some(customer.party_id));
        assert_eq!(hub.active_trackings(), 0);
    }
}
