use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;
use uuid::Uuid;

use crate::directory::orders::{AddressRecord, OrderDirectory, OrderRecord, RestaurantRecord};
use crate::error::AppError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Order directory backed by the order service's REST API.
pub struct HttpOrderDirectory {
    client: Client,
    base_url: String,
}

impl HttpOrderDirectory {
    pub fn new(base_url: impl Into<String>) -> Result<Self, AppError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn fetch<T: DeserializeOwned>(&self, resource: &str, id: Uuid) -> Result<T, AppError> {
        let url = format!("{}/{}/{}", self.base_url, resource, id);
        debug!(url = %url, "fetching from order service");

        let response = self.client.get(&url).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(AppError::NotFound(format!("{resource} {id} not found")));
        }
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::Infrastructure(format!(
                "order service error {status} for {url}: {text}"
            )));
        }

        response
            .json()
            .await
            .map_err(|err| AppError::Infrastructure(format!("parse error for {url}: {err}")))
    }
}

#[async_trait]
impl OrderDirectory for HttpOrderDirectory {
    async fn order(&self, order_id: Uuid) -> Result<OrderRecord, AppError> {
        self.fetch("orders", order_id).await
    }

    async fn restaurant(&self, restaurant_id: Uuid) -> Result<RestaurantRecord, AppError> {
        self.fetch("restaurants", restaurant_id).await
    }

    async fn address(&self, address_id: Uuid) -> Result<AddressRecord, AppError> {
        self.fetch("addresses", address_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::HttpOrderDirectory;

    #[test]
    fn trailing_slash_is_trimmed() {
        let directory = HttpOrderDirectory::new("http://orders.internal:8080/").unwrap();
        assert_eq!(directory.base_url, "http://orders.internal:8080");
    }
}
