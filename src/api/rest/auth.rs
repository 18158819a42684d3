use std::sync::Arc;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use uuid::Uuid;

use crate::directory::{Role, Session};
use crate::error::AppError;
use crate::state::AppState;

/// Any authenticated party.
pub struct AuthSession(pub Session);

/// An authenticated courier; yields the courier id.
pub struct CourierSession(pub Uuid);

/// An authenticated customer; yields the customer id.
pub struct CustomerSession(pub Uuid);

/// An internal caller (order service or operator) presenting the configured
/// service token. Rejects everyone when no token is configured.
pub struct ServiceAccess;

/// Token from `Authorization: Bearer ...`, falling back to the `token` query
/// parameter for clients that cannot set headers on a websocket upgrade.
fn session_token(parts: &Parts) -> Option<String> {
    let from_header = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string());

    from_header.or_else(|| {
        parts.uri.query().and_then(|query| {
            query
                .split('&')
                .filter_map(|pair| pair.split_once('='))
                .find(|(key, _)| *key == "token")
                .map(|(_, value)| value.to_string())
        })
    })
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthSession {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = session_token(parts)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| AppError::Unauthorized("missing session token".to_string()))?;

        let session = state.sessions.verify(&token).await?;
        Ok(Self(session))
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for CourierSession {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let AuthSession(session) = AuthSession::from_request_parts(parts, state).await?;
        match session.role {
            Role::Courier => Ok(Self(session.party_id)),
            Role::Customer => Err(AppError::Unauthorized(
                "courier session required".to_string(),
            )),
        }
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for CustomerSession {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let AuthSession(session) = AuthSession::from_request_parts(parts, state).await?;
        match session.role {
            Role::Customer => Ok(Self(session.party_id)),
            Role::Courier => Err(AppError::Unauthorized(
                "customer session required".to_string(),
            )),
        }
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for ServiceAccess {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let expected = state
            .config
            .service_token
            .as_deref()
            .ok_or_else(|| AppError::Unauthorized("service access is not configured".to_string()))?;

        match session_token(parts) {
            Some(token) if token == expected => Ok(Self),
            Some(_) => Err(AppError::Unauthorized("invalid service token".to_string())),
            None => Err(AppError::Unauthorized("missing service token".to_string())),
        }
    }
}
