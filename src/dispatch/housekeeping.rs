use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

use crate::dispatch::DispatchCoordinator;
use crate::presence::{ClaimStore, PresenceRegistry};

/// Periodic upkeep: moves due PICKED_UP deliveries to IN_TRANSIT and drops
/// expired liveness markers and claim keys.
pub async fn run_housekeeping(
    coordinator: Arc<DispatchCoordinator>,
    presence: Arc<PresenceRegistry>,
    claims: Arc<ClaimStore>,
    every: Duration,
) {
    info!(interval_secs = every.as_secs(), "housekeeping started");

    let mut ticks = IntervalStream::new(tokio::time::interval(every));
    while ticks.next().await.is_some() {
        sweep(&coordinator, &presence, &claims).await;
    }

    warn!("housekeeping stopped");
}

pub async fn sweep(coordinator: &DispatchCoordinator, presence: &PresenceRegistry, claims: &ClaimStore) {
    match coordinator.complete_due_transits(Utc::now()).await {
        Ok(0) => {}
        Ok(moved) => info!(moved, "due deliveries moved to in transit"),
        Err(err) => error!(error = %err, "failed to advance due deliveries"),
    }

    let expired_markers = presence.purge_expired();
    let expired_claims = claims.purge_expired();
    if expired_markers > 0 || expired_claims > 0 {
        debug!(expired_markers, expired_claims, "expired presence and claims purged");
    }
}
