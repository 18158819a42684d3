use std::sync::Arc;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::directory::{Role, Session};
use crate::error::AppError;
use crate::hub::ConnectionHub;
use crate::mediator::{CourierStatusPort, DeliveryAssigner};
use crate::models::messages::{ClientMessage, ServerMessage};
use crate::models::{CourierStatus, GeoPoint};
use crate::observability::metrics::Metrics;
use crate::presence::{ClaimStore, PresenceRegistry};

/// Handles inbound channel frames: location pings, offer acceptance and
/// transit reports.
pub struct TrackingRelay {
    hub: Arc<ConnectionHub>,
    claims: Arc<ClaimStore>,
    presence: Arc<PresenceRegistry>,
    status: Arc<dyn CourierStatusPort>,
    assigner: Arc<dyn DeliveryAssigner>,
    metrics: Metrics,
}

impl TrackingRelay {
    pub fn new(
        hub: Arc<ConnectionHub>,
        claims: Arc<ClaimStore>,
        presence: Arc<PresenceRegistry>,
        status: Arc<dyn CourierStatusPort>,
        assigner: Arc<dyn DeliveryAssigner>,
        metrics: Metrics,
    ) -> Self {
        Self {
            hub,
            claims,
            presence,
            status,
            assigner,
            metrics,
        }
    }

    pub async fn handle_client_message(&self, session: Session, message: ClientMessage) {
        if session.role != Role::Courier {
            self.reply_error(session, "only couriers may send this event");
            return;
        }
        let courier_id = session.party_id;

        let result = match message {
            ClientMessage::AvailableLocationUpdate(location) => self
                .handle_available_location_update(courier_id, location)
                .await
                .map(|_| ()),
            ClientMessage::OccupiedLocationUpdate(location) => {
                self.handle_occupied_location_update(courier_id, location)
                    .await;
                Ok(())
            }
            ClientMessage::DeliveryResponseAccept {
                order_id,
                customer_id,
            } => {
                self.handle_delivery_response_accept(courier_id, order_id, customer_id)
                    .await;
                Ok(())
            }
            ClientMessage::TransitStarted { order_id } => self
                .assigner
                .transit_started(courier_id, order_id)
                .await
                .map(|_| ()),
        };

        if let Err(err) = result {
            warn!(courier_id = %courier_id, error = %err, "channel event failed");
            self.reply_error(session, &err.to_string());
        }
    }

    fn reply_error(&self, session: Session, message: &str) {
        self.hub.send(
            session.role,
            session.party_id,
            ServerMessage::Error {
                message: message.to_string(),
            },
        );
    }

    /// Resolves the accept race for one order. At most one courier per order
    /// ever receives `accepted: true`, and only an ONLINE courier can win.
    ///
    /// The courier is reserved (ONLINE -> OCCUPIED) before the order claim so
    /// the same courier cannot win two orders; every failure after that point
    /// hands the courier and the claim back.
    pub async fn handle_delivery_response_accept(
        &self,
        courier_id: Uuid,
        order_id: Uuid,
        customer_id: Uuid,
    ) -> bool {
        if let Err(err) = self
            .status
            .transition_status(courier_id, &[CourierStatus::Online], CourierStatus::Occupied)
            .await
        {
            self.metrics.claims_total.with_label_values(&["rejected"]).inc();
            match &err {
                AppError::Conflict(_) | AppError::NotFound(_) => {
                    warn!(order_id = %order_id, courier_id = %courier_id, error = %err, "courier cannot accept offers");
                }
                _ => {
                    error!(order_id = %order_id, courier_id = %courier_id, error = %err, "failed to reserve courier");
                }
            }
            self.acknowledge(courier_id, order_id, false);
            return false;
        }

        if !self.claims.try_claim(order_id, courier_id) {
            self.metrics.claims_total.with_label_values(&["lost"]).inc();
            debug!(
                order_id = %order_id,
                courier_id = %courier_id,
                holder = ?self.claims.holder(&order_id),
                "claim already held"
            );
            self.release_courier(courier_id).await;
            self.acknowledge(courier_id, order_id, false);
            return false;
        }

        let delivery = match self
            .assigner
            .assigned_partner(courier_id, order_id, customer_id)
            .await
        {
            Ok(delivery) => delivery,
            Err(err) => {
                self.metrics.claims_total.with_label_values(&["rejected"]).inc();
                if err.is_retryable() {
                    error!(order_id = %order_id, courier_id = %courier_id, error = %err, "claimed delivery could not be assigned");
                } else {
                    warn!(order_id = %order_id, courier_id = %courier_id, error = %err, "claimed delivery could not be assigned");
                }
                self.claims.release(&order_id, courier_id);
                self.release_courier(courier_id).await;
                self.acknowledge(courier_id, order_id, false);
                return false;
            }
        };

        self.presence.remove_driver(courier_id);
        self.hub.bind_tracking(courier_id, delivery.customer_id);

        self.metrics.claims_total.with_label_values(&["won"]).inc();
        info!(order_id = %order_id, courier_id = %courier_id, "courier won delivery");
        self.acknowledge(courier_id, order_id, true);
        true
    }

    async fn release_courier(&self, courier_id: Uuid) {
        if let Err(err) = self
            .status
            .transition_status(courier_id, &[CourierStatus::Occupied], CourierStatus::Online)
            .await
        {
            error!(courier_id = %courier_id, error = %err, "failed to release reserved courier");
        }
    }

    fn acknowledge(&self, courier_id: Uuid, order_id: Uuid, accepted: bool) {
        self.hub.send(
            Role::Courier,
            courier_id,
            ServerMessage::Acknowledgement { order_id, accepted },
        );
    }

    /// Relays a delivering courier's position to the bound customer. Couriers
    /// without a binding are silently ignored.
    pub async fn handle_occupied_location_update(&self, courier_id: Uuid, location: GeoPoint) -> bool {
        if let Err(err) = self.status.record_location(courier_id, location).await {
            debug!(courier_id = %courier_id, error = %err, "last location not recorded");
        }
        self.hub.relay_tracking(courier_id, location)
    }

    /// Enters the ping into the matching pool only for ONLINE couriers.
    pub async fn handle_available_location_update(
        &self,
        courier_id: Uuid,
        location: GeoPoint,
    ) -> Result<bool, AppError> {
        if !location.is_valid() {
            return Err(AppError::InvalidArgument(
                "coordinates out of range".to_string(),
            ));
        }

        let status = self.status.find_status(courier_id).await?;
        if status != CourierStatus::Online {
            debug!(courier_id = %courier_id, status = ?status, "ignoring available ping");
            return Ok(false);
        }

        self.presence.update_driver_location(courier_id, location);
        if let Err(err) = self.status.record_location(courier_id, location).await {
            debug!(courier_id = %courier_id, error = %err, "last location not recorded");
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::sync::mpsc;
    use uuid::Uuid;

    use super::TrackingRelay;
    use crate::directory::{CourierProfileStore, Role, Session};
    use crate::dispatch::tests::{fixture, online_courier, restaurant_point, seed_order, Fixture};
    use crate::mediator::StatusMediator;
    use crate::models::messages::{ClientMessage, ServerMessage};
    use crate::models::{CourierStatus, DeliveryStatus, GeoPoint};
    use crate::observability::metrics::Metrics;
    use crate::presence::ClaimStore;

    fn relay(fx: &Fixture) -> Arc<TrackingRelay> {
        let mediator = Arc::new(StatusMediator::new(
            fx.couriers.clone(),
            fx.coordinator.clone(),
        ));
        Arc::new(TrackingRelay::new(
            fx.hub.clone(),
            Arc::new(ClaimStore::new(Duration::from_secs(300))),
            fx.presence.clone(),
            mediator.clone(),
            mediator,
            Metrics::new(),
        ))
    }

    fn acks(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> Vec<bool> {
        let mut seen = Vec::new();
        while let Ok(message) = rx.try_recv() {
            if let ServerMessage::Acknowledgement { accepted, .. } = message {
                seen.push(accepted);
            }
        }
        seen
    }

    #[tokio::test]
    async fn exactly_one_of_two_accepts_wins() {
        let fx = fixture();
        let relay = relay(&fx);
        let (order_id, customer_id) = seed_order(&fx.directory, 1, 25.0);
        let (a, mut a_rx) = online_courier(&fx, 1, 0.5).await;
        let (b, mut b_rx) = online_courier(&fx, 2, 0.9).await;
        fx.coordinator.create_delivery(order_id).await.unwrap();

        let (won_a, won_b) = tokio::join!(
            relay.handle_delivery_response_accept(a, order_id, customer_id),
            relay.handle_delivery_response_accept(b, order_id, customer_id),
        );

        assert!(won_a ^ won_b);
        let positives = acks(&mut a_rx)
            .into_iter()
            .chain(acks(&mut b_rx))
            .filter(|accepted| *accepted)
            .count();
        assert_eq!(positives, 1);

        let winner = if won_a { a } else { b };
        let delivery = fx.coordinator.get_delivery(order_id).await.unwrap();
        assert_eq!(delivery.status, DeliveryStatus::Assigned);
        assert_eq!(delivery.courier_id, Some(winner));
        assert_eq!(
            fx.couriers.get(winner).await.unwrap().status,
            CourierStatus::Occupied
        );
        assert_eq!(fx.hub.tracked_customer(&winner), Some(customer_id));
        assert!(!fx.presence.is_live(&winner));

        let loser = if won_a { b } else { a };
        assert_eq!(
            fx.couriers.get(loser).await.unwrap().status,
            CourierStatus::Online
        );
    }

    #[tokio::test]
    async fn occupied_courier_cannot_win_a_second_order() {
        let fx = fixture();
        let relay = relay(&fx);
        let (first, first_customer) = seed_order(&fx.directory, 1, 25.0);
        let (second, second_customer) = seed_order(&fx.directory, 2, 25.0);
        let (courier_id, mut rx) = online_courier(&fx, 1, 0.5).await;
        fx.coordinator.create_delivery(first).await.unwrap();
        fx.coordinator.create_delivery(second).await.unwrap();

        assert!(
            relay
                .handle_delivery_response_accept(courier_id, first, first_customer)
                .await
        );
        assert!(
            !relay
                .handle_delivery_response_accept(courier_id, second, second_customer)
                .await
        );
        assert_eq!(acks(&mut rx), vec![true, false]);

        let second_delivery = fx.coordinator.get_delivery(second).await.unwrap();
        assert_eq!(second_delivery.status, DeliveryStatus::Pending);
        assert_eq!(second_delivery.courier_id, None);
        assert_eq!(fx.hub.tracked_customer(&courier_id), Some(first_customer));
        assert_eq!(
            fx.couriers.get(courier_id).await.unwrap().status,
            CourierStatus::Occupied
        );

        let (other, _other_rx) = online_courier(&fx, 2, 0.8).await;
        assert!(
            relay
                .handle_delivery_response_accept(other, second, second_customer)
                .await
        );
    }

    #[tokio::test]
    async fn courier_without_profile_cannot_accept() {
        let fx = fixture();
        let relay = relay(&fx);
        let (order_id, customer_id) = seed_order(&fx.directory, 1, 25.0);
        fx.coordinator.create_delivery(order_id).await.unwrap();

        let unknown = Uuid::from_u128(404);
        assert!(
            !relay
                .handle_delivery_response_accept(unknown, order_id, customer_id)
                .await
        );
        let delivery = fx.coordinator.get_delivery(order_id).await.unwrap();
        assert_eq!(delivery.status, DeliveryStatus::Pending);
        assert!(fx.hub.tracked_customer(&unknown).is_none());
    }

    #[tokio::test]
    async fn accept_naming_another_customer_is_rejected_and_released() {
        let fx = fixture();
        let relay = relay(&fx);
        let (order_id, customer_id) = seed_order(&fx.directory, 1, 25.0);
        let (courier_id, mut rx) = online_courier(&fx, 1, 0.5).await;
        fx.coordinator.create_delivery(order_id).await.unwrap();
        while rx.try_recv().is_ok() {}

        assert!(
            !relay
                .handle_delivery_response_accept(courier_id, order_id, Uuid::from_u128(999))
                .await
        );
        assert_eq!(acks(&mut rx), vec![false]);
        assert_eq!(
            fx.coordinator.get_delivery(order_id).await.unwrap().status,
            DeliveryStatus::Pending
        );
        assert_eq!(
            fx.couriers.get(courier_id).await.unwrap().status,
            CourierStatus::Online
        );

        assert!(
            relay
                .handle_delivery_response_accept(courier_id, order_id, customer_id)
                .await
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_accepts_across_threads_yield_one_positive_ack() {
        let fx = fixture();
        let relay = relay(&fx);
        let (order_id, customer_id) = seed_order(&fx.directory, 1, 25.0);
        fx.coordinator.create_delivery(order_id).await.unwrap();

        let mut receivers = Vec::new();
        let mut tasks = Vec::new();
        for seed in 1..=8u128 {
            let (courier_id, rx) = online_courier(&fx, seed, seed as f64 * 0.3).await;
            receivers.push(rx);
            let relay = relay.clone();
            tasks.push(tokio::spawn(async move {
                relay
                    .handle_delivery_response_accept(courier_id, order_id, customer_id)
                    .await
            }));
        }

        let mut winners = 0;
        for task in tasks {
            if task.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);

        let positives: usize = receivers
            .iter_mut()
            .map(|rx| acks(rx).into_iter().filter(|accepted| *accepted).count())
            .sum();
        assert_eq!(positives, 1);
    }

    #[tokio::test]
    async fn occupied_courier_pings_do_not_enter_the_pool() {
        let fx = fixture();
        let relay = relay(&fx);
        let (courier_id, _rx) = online_courier(&fx, 1, 0.5).await;
        fx.presence.remove_driver(courier_id);
        fx.couriers
            .set_status(courier_id, CourierStatus::Occupied)
            .await
            .unwrap();

        let accepted = relay
            .handle_available_location_update(courier_id, restaurant_point())
            .await
            .unwrap();

        assert!(!accepted);
        assert!(fx.presence.location_of(&courier_id).is_none());
    }

    #[tokio::test]
    async fn online_courier_pings_refresh_presence() {
        let fx = fixture();
        let relay = relay(&fx);
        let (courier_id, _rx) = online_courier(&fx, 1, 0.5).await;
        let moved = GeoPoint::new(12.98, 77.6);

        assert!(
            relay
                .handle_available_location_update(courier_id, moved)
                .await
                .unwrap()
        );
        assert_eq!(fx.presence.location_of(&courier_id), Some(moved));
        assert_eq!(
            fx.couriers.get(courier_id).await.unwrap().last_location,
            Some(moved)
        );
    }

    #[tokio::test]
    async fn occupied_updates_reach_the_bound_customer() {
        let fx = fixture();
        let relay = relay(&fx);
        let (order_id, customer_id) = seed_order(&fx.directory, 1, 25.0);
        let (courier_id, _courier_rx) = online_courier(&fx, 1, 0.5).await;
        let (tx, mut customer_rx) = mpsc::unbounded_channel();
        fx.hub.register(
            Session {
                party_id: customer_id,
                role: Role::Customer,
            },
            tx,
        );

        let idle = Uuid::from_u128(77);
        assert!(
            !relay
                .handle_occupied_location_update(idle, restaurant_point())
                .await
        );

        fx.coordinator.create_delivery(order_id).await.unwrap();
        relay
            .handle_delivery_response_accept(courier_id, order_id, customer_id)
            .await;

        let here = GeoPoint::new(12.975, 77.597);
        assert!(relay.handle_occupied_location_update(courier_id, here).await);
        assert_eq!(
            customer_rx.try_recv().unwrap(),
            ServerMessage::TrackingUpdate(here)
        );
    }

    #[tokio::test]
    async fn customers_cannot_send_courier_events() {
        let fx = fixture();
        let relay = relay(&fx);
        let customer = Session {
            party_id: Uuid::from_u128(50),
            role: Role::Customer,
        };
        let (tx, mut rx) = mpsc::unbounded_channel();
        fx.hub.register(customer, tx);

        relay
            .handle_client_message(
                customer,
                ClientMessage::AvailableLocationUpdate(restaurant_point()),
            )
            .await;

        assert!(matches!(rx.try_recv(), Ok(ServerMessage::Error { .. })));
        assert_eq!(fx.presence.live_count(), 0);
    }
}
