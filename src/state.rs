use std::sync::Arc;

use crate::config::Config;
use crate::directory::{CourierProfileStore, OrderDirectory, SessionVerifier};
use crate::dispatch::store::DeliveryStore;
use crate::dispatch::{DispatchCoordinator, DispatchPolicy};
use crate::hub::{ConnectionHub, TrackingRelay};
use crate::ingest::InMemoryEventLog;
use crate::mediator::StatusMediator;
use crate::observability::metrics::Metrics;
use crate::presence::{ClaimStore, PresenceRegistry};

/// Stores and services owned outside this crate.
pub struct Collaborators {
    pub directory: Arc<dyn OrderDirectory>,
    pub couriers: Arc<dyn CourierProfileStore>,
    pub deliveries: Arc<dyn DeliveryStore>,
    pub sessions: Arc<dyn SessionVerifier>,
}

pub struct AppState {
    pub config: Config,
    pub presence: Arc<PresenceRegistry>,
    pub claims: Arc<ClaimStore>,
    pub hub: Arc<ConnectionHub>,
    pub coordinator: Arc<DispatchCoordinator>,
    pub mediator: Arc<StatusMediator>,
    pub relay: Arc<TrackingRelay>,
    pub couriers: Arc<dyn CourierProfileStore>,
    pub sessions: Arc<dyn SessionVerifier>,
    pub events: Arc<InMemoryEventLog>,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(config: Config, collaborators: Collaborators) -> Self {
        let metrics = Metrics::new();
        let presence = Arc::new(PresenceRegistry::new(config.presence_ttl, metrics.clone()));
        let claims = Arc::new(ClaimStore::new(config.claim_ttl));
        let hub = Arc::new(ConnectionHub::new(metrics.clone()));

        let policy = DispatchPolicy {
            radius_km: config.search_radius_km,
            candidate_count: config.candidate_count,
            transit_delay: config.transit_delay,
            history_max_limit: config.history_max_limit,
            currency: config.earnings_currency.clone(),
        };

        let coordinator = Arc::new(DispatchCoordinator::new(
            collaborators.deliveries,
            collaborators.directory,
            collaborators.couriers.clone(),
            presence.clone(),
            hub.clone(),
            policy,
            metrics.clone(),
        ));

        let mediator = Arc::new(StatusMediator::new(
            collaborators.couriers.clone(),
            coordinator.clone(),
        ));

        let relay = Arc::new(TrackingRelay::new(
            hub.clone(),
            claims.clone(),
            presence.clone(),
            mediator.clone(),
            mediator.clone(),
            metrics.clone(),
        ));

        let events = Arc::new(InMemoryEventLog::new(config.event_buffer_size));

        Self {
            config,
            presence,
            claims,
            hub,
            coordinator,
            mediator,
            relay,
            couriers: collaborators.couriers,
            sessions: collaborators.sessions,
            events,
            metrics,
        }
    }
}
