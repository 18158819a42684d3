use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{CourierProfile, CourierStatus, GeoPoint};

/// Durable courier profiles. Onboarding writes them; dispatch only touches
/// status and last known location.
#[async_trait]
pub trait CourierProfileStore: Send + Sync {
    async fn get(&self, courier_id: Uuid) -> Result<CourierProfile, AppError>;
    async fn upsert(&self, profile: CourierProfile) -> Result<(), AppError>;
    async fn set_status(&self, courier_id: Uuid, status: CourierStatus) -> Result<(), AppError>;
    /// Moves the courier to `to` only if the current status is one of `from`;
    /// otherwise `Conflict`. Check and write happen as one step.
    async fn transition_status(
        &self,
        courier_id: Uuid,
        from: &[CourierStatus],
        to: CourierStatus,
    ) -> Result<CourierProfile, AppError>;
    async fn set_last_location(&self, courier_id: Uuid, location: GeoPoint) -> Result<(), AppError>;
}

#[derive(Default)]
pub struct InMemoryCourierStore {
    profiles: DashMap<Uuid, CourierProfile>,
}

impl InMemoryCourierStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CourierProfileStore for InMemoryCourierStore {
    async fn get(&self, courier_id: Uuid) -> Result<CourierProfile, AppError> {
        self.profiles
            .get(&courier_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AppError::NotFound(format!("courier {courier_id} not found")))
    }

    async fn upsert(&self, profile: CourierProfile) -> Result<(), AppError> {
        self.profiles.insert(profile.id, profile);
        Ok(())
    }

    async fn set_status(&self, courier_id: Uuid, status: CourierStatus) -> Result<(), AppError> {
        let mut profile = self
            .profiles
            .get_mut(&courier_id)
            .ok_or_else(|| AppError::NotFound(format!("courier {courier_id} not found")))?;

        profile.status = status;
        profile.updated_at = Utc::now();
        Ok(())
    }

    async fn transition_status(
        &self,
        courier_id: Uuid,
        from: &[CourierStatus],
        to: CourierStatus,
    ) -> Result<CourierProfile, AppError> {
        let mut profile = self
            .profiles
            .get_mut(&courier_id)
            .ok_or_else(|| AppError::NotFound(format!("courier {courier_id} not found")))?;

        if !from.contains(&profile.status) {
            return Err(AppError::Conflict(format!(
                "courier {courier_id} is {:?}, cannot become {to:?}",
                profile.status
            )));
        }

        profile.status = to;
        profile.updated_at = Utc::now();
        Ok(profile.clone())
    }

    async fn set_last_location(&self, courier_id: Uuid, location: GeoPoint) -> Result<(), AppError> {
        let mut profile = self
            .profiles
            .get_mut(&courier_id)
            .ok_or_else(|| AppError::NotFound(format!("courier {courier_id} not found")))?;

        profile.last_location = Some(location);
        profile.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::{CourierProfileStore, InMemoryCourierStore};
    use crate::error::AppError;
    use crate::models::{CourierProfile, CourierStatus};

    #[tokio::test]
    async fn transition_only_from_allowed_statuses() {
        let store = InMemoryCourierStore::new();
        let courier_id = Uuid::from_u128(1);
        store
            .upsert(CourierProfile::new(courier_id, "rider"))
            .await
            .unwrap();

        let err = store
            .transition_status(courier_id, &[CourierStatus::Online], CourierStatus::Occupied)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(
            store.get(courier_id).await.unwrap().status,
            CourierStatus::Offline
        );

        let profile = store
            .transition_status(
                courier_id,
                &[CourierStatus::Online, CourierStatus::Offline],
                CourierStatus::Online,
            )
            .await
            .unwrap();
        assert_eq!(profile.status, CourierStatus::Online);
    }

    #[tokio::test]
    async fn transition_of_unknown_courier_is_not_found() {
        let store = InMemoryCourierStore::new();
        let err = store
            .transition_status(
                Uuid::from_u128(9),
                &[CourierStatus::Online],
                CourierStatus::Occupied,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
