use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
struct Claim {
    courier_id: Uuid,
    expires_at: Instant,
}

/// Per-order claim keys. Whoever creates the key for an order owns the offer;
/// the key expires so a crashed claimant cannot hold it forever.
pub struct ClaimStore {
    claims: DashMap<Uuid, Claim>,
    ttl: Duration,
}

impl ClaimStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            claims: DashMap::new(),
            ttl,
        }
    }

    /// Creates the claim if no unexpired one exists. The shard lock held by
    /// `entry` makes check-and-insert a single step.
    pub fn try_claim(&self, order_id: Uuid, courier_id: Uuid) -> bool {
        let now = Instant::now();
        let claim = Claim {
            courier_id,
            expires_at: now + self.ttl,
        };

        match self.claims.entry(order_id) {
            Entry::Occupied(mut existing) => {
                if existing.get().expires_at <= now {
                    existing.insert(claim);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(claim);
                true
            }
        }
    }

    pub fn holder(&self, order_id: &Uuid) -> Option<Uuid> {
        let now = Instant::now();
        self.claims
            .get(order_id)
            .filter(|claim| claim.expires_at > now)
            .map(|claim| claim.courier_id)
    }

    /// Drops the claim if `courier_id` still holds it.
    pub fn release(&self, order_id: &Uuid, courier_id: Uuid) -> bool {
        self.claims
            .remove_if(order_id, |_, claim| claim.courier_id == courier_id)
            .is_some()
    }

    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.claims.len();
        self.claims.retain(|_, claim| claim.expires_at > now);
        before.saturating_sub(self.claims.len())
    }
}
