//! Ephemeral courier presence: a geo index of last reported positions plus a
//! liveness marker per courier that expires after a fixed TTL.
//!
//! The two maps are written together but expire separately, so a geo entry can
//! outlive its liveness marker. Lookups reconcile that by evicting such stale
//! entries as they are encountered.

pub mod claims;

use std::collections::HashSet;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use crate::geo::haversine_km;
use crate::models::GeoPoint;
use crate::observability::metrics::Metrics;

pub use claims::ClaimStore;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Nearest {
    pub courier_id: Uuid,
    pub distance_km: f64,
}

pub struct PresenceRegistry {
    geo: DashMap<Uuid, GeoPoint>,
    liveness: DashMap<Uuid, Instant>,
    ttl: Duration,
    metrics: Metrics,
}

impl PresenceRegistry {
    pub fn new(ttl: Duration, metrics: Metrics) -> Self {
        Self {
            geo: DashMap::new(),
            liveness: DashMap::new(),
            ttl,
            metrics,
        }
    }

    /// Advertises the courier as reachable at `location` for one TTL window.
    pub fn add_available_driver(&self, courier_id: Uuid, location: GeoPoint) {
        self.geo.insert(courier_id, location);
        self.liveness.insert(courier_id, Instant::now() + self.ttl);
        self.metrics.presence_entries.set(self.geo.len() as i64);
        debug!(courier_id = %courier_id, lat = location.latitude, lng = location.longitude, "presence refreshed");
    }

    pub fn update_driver_location(&self, courier_id: Uuid, location: GeoPoint) {
        self.add_available_driver(courier_id, location);
    }

    pub fn remove_driver(&self, courier_id: Uuid) {
        self.geo.remove(&courier_id);
        self.liveness.remove(&courier_id);
        self.metrics.presence_entries.set(self.geo.len() as i64);
    }

    pub fn is_live(&self, courier_id: &Uuid) -> bool {
        self.liveness
            .get(courier_id)
            .is_some_and(|expires_at| *expires_at > Instant::now())
    }

    pub fn location_of(&self, courier_id: &Uuid) -> Option<GeoPoint> {
        self.geo.get(courier_id).map(|entry| *entry.value())
    }

    /// Couriers whose liveness marker has not expired.
    pub fn live_count(&self) -> usize {
        let now = Instant::now();
        self.liveness
            .iter()
            .filter(|entry| *entry.value() > now)
            .count()
    }

    /// Raw geo query: up to `count` entries within `radius_km`, nearest first.
    /// Liveness is not consulted.
    pub fn nearest_within(&self, origin: &GeoPoint, radius_km: f64, count: usize) -> Vec<Nearest> {
        let mut hits: Vec<Nearest> = self
            .geo
            .iter()
            .filter_map(|entry| {
                let distance_km = haversine_km(origin, entry.value());
                (distance_km <= radius_km).then_some(Nearest {
                    courier_id: *entry.key(),
                    distance_km,
                })
            })
            .collect();

        hits.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
        hits.truncate(count);
        hits
    }

    /// Nearest live courier within `radius_km` that is not in `exclude`.
    ///
    /// Each round asks the geo index for `count + |excluded|` hits and checks
    /// the first one not excluded. A hit without a live marker is evicted and
    /// excluded before the next round.
    pub fn find_nearest_driver(
        &self,
        origin: &GeoPoint,
        radius_km: f64,
        count: usize,
        exclude: &[Uuid],
    ) -> Option<Nearest> {
        let mut excluded: HashSet<Uuid> = exclude.iter().copied().collect();

        loop {
            let hits = self.nearest_within(origin, radius_km, count + excluded.len());
            let candidate = hits
                .into_iter()
                .find(|hit| !excluded.contains(&hit.courier_id))?;

            if self.is_live(&candidate.courier_id) {
                return Some(candidate);
            }

            info!(
                courier_id = %candidate.courier_id,
                distance_km = candidate.distance_km,
                "evicting stale presence entry"
            );
            self.remove_driver(candidate.courier_id);
            self.metrics.presence_stale_evictions_total.inc();
            excluded.insert(candidate.courier_id);
        }
    }

    /// Up to `count` live couriers, nearest first.
    pub fn find_nearest_drivers(&self, origin: &GeoPoint, radius_km: f64, count: usize) -> Vec<Nearest> {
        let mut found: Vec<Nearest> = Vec::with_capacity(count);
        let mut chosen: Vec<Uuid> = Vec::with_capacity(count);

        while found.len() < count {
            match self.find_nearest_driver(origin, radius_km, 1, &chosen) {
                Some(hit) => {
                    chosen.push(hit.courier_id);
                    found.push(hit);
                }
                None => break,
            }
        }

        found
    }

    /// Drops expired liveness markers. Geo entries stay until a lookup meets
    /// them or the courier refreshes.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.liveness.len();
        self.liveness.retain(|_, expires_at| *expires_at > now);
        before.saturating_sub(self.liveness.len())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use uuid::Uuid;

    use super::PresenceRegistry;
    use crate::geo::offset_north;
    use crate::models::GeoPoint;
    use crate::observability::metrics::Metrics;

    const TTL: Duration = Duration::from_secs(300);

    fn origin() -> GeoPoint {
        GeoPoint::new(12.9716, 77.5946)
    }

    fn registry() -> PresenceRegistry {
        PresenceRegistry::new(TTL, Metrics::new())
    }

    #[tokio::test(start_paused = true)]
    async fn returns_live_courier_and_evicts_closer_stale_one() {
        let registry = registry();
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);

        registry.add_available_driver(b, offset_north(&origin(), 0.8));
        tokio::time::advance(Duration::from_secs(200)).await;
        registry.add_available_driver(a, offset_north(&origin(), 1.2));
        tokio::time::advance(Duration::from_secs(150)).await;

        let hit = registry
            .find_nearest_driver(&origin(), 5.0, 1, &[])
            .expect("live courier expected");

        assert_eq!(hit.courier_id, a);
        assert!((hit.distance_km - 1.2).abs() < 1e-3);
        assert!(registry.location_of(&b).is_none());
        assert_eq!(registry.metrics.presence_stale_evictions_total.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn never_returns_expired_courier() {
        let registry = registry();
        let only = Uuid::from_u128(1);
        registry.add_available_driver(only, offset_north(&origin(), 0.5));

        tokio::time::advance(TTL + Duration::from_secs(1)).await;

        assert!(registry.find_nearest_driver(&origin(), 5.0, 1, &[]).is_none());
        assert!(registry.location_of(&only).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_extends_liveness() {
        let registry = registry();
        let courier = Uuid::from_u128(1);
        registry.add_available_driver(courier, offset_north(&origin(), 0.5));

        tokio::time::advance(Duration::from_secs(250)).await;
        registry.update_driver_location(courier, offset_north(&origin(), 0.6));
        tokio::time::advance(Duration::from_secs(250)).await;

        let hit = registry.find_nearest_driver(&origin(), 5.0, 1, &[]).unwrap();
        assert_eq!(hit.courier_id, courier);
    }

    #[test]
    fn respects_radius_and_exclusions() {
        let registry = registry();
        let near = Uuid::from_u128(1);
        let far = Uuid::from_u128(2);
        registry.add_available_driver(near, offset_north(&origin(), 1.0));
        registry.add_available_driver(far, offset_north(&origin(), 8.0));

        let hit = registry.find_nearest_driver(&origin(), 5.0, 1, &[]).unwrap();
        assert_eq!(hit.courier_id, near);
        assert!(registry.find_nearest_driver(&origin(), 5.0, 1, &[near]).is_none());

        let wide = registry.find_nearest_driver(&origin(), 10.0, 1, &[near]).unwrap();
        assert_eq!(wide.courier_id, far);
    }

    #[test]
    fn distances_never_decrease_when_excluding_previous_hits() {
        let registry = registry();
        for (seed, km) in [(1u128, 3.1), (2, 0.4), (3, 2.2), (4, 1.7), (5, 4.9)] {
            registry.add_available_driver(Uuid::from_u128(seed), offset_north(&origin(), km));
        }

        let mut excluded = Vec::new();
        let mut last = 0.0;
        while let Some(hit) = registry.find_nearest_driver(&origin(), 5.0, 1, &excluded) {
            assert!(hit.distance_km >= last);
            last = hit.distance_km;
            excluded.push(hit.courier_id);
        }
        assert_eq!(excluded.len(), 5);
    }

    #[test]
    fn nearest_drivers_caps_at_count() {
        let registry = registry();
        for seed in 1..=6u128 {
            registry.add_available_driver(
                Uuid::from_u128(seed),
                offset_north(&origin(), seed as f64 * 0.5),
            );
        }

        let hits = registry.find_nearest_drivers(&origin(), 5.0, 4);
        let ids: Vec<Uuid> = hits.iter().map(|hit| hit.courier_id).collect();
        assert_eq!(ids, (1..=4u128).map(Uuid::from_u128).collect::<Vec<_>>());
    }

    #[test]
    fn remove_driver_clears_both_maps() {
        let registry = registry();
        let courier = Uuid::from_u128(9);
        registry.add_available_driver(courier, origin());
        registry.remove_driver(courier);

        assert!(!registry.is_live(&courier));
        assert!(registry.location_of(&courier).is_none());
        assert_eq!(registry.live_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn purge_drops_only_expired_markers() {
        let registry = registry();
        let stale = Uuid::from_u128(1);
        let fresh = Uuid::from_u128(2);
        registry.add_available_driver(stale, origin());
        tokio::time::advance(Duration::from_secs(200)).await;
        registry.add_available_driver(fresh, origin());
        tokio::time::advance(Duration::from_secs(150)).await;

        assert_eq!(registry.purge_expired(), 1);
        assert!(registry.is_live(&fresh));
        assert!(registry.location_of(&stale).is_some());
    }
}
