use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Courier,
    Customer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Courier => "courier",
            Role::Customer => "customer",
        }
    }
}

/// Authenticated identity behind a request or live channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    pub party_id: Uuid,
    pub role: Role,
}

#[async_trait]
pub trait SessionVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Session, AppError>;
}

/// Fixed token table, parsed from `token=role:uuid` pairs separated by commas.
#[derive(Default)]
pub struct StaticSessionVerifier {
    sessions: DashMap<String, Session>,
}

impl StaticSessionVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(raw: &str) -> Result<Self, AppError> {
        let verifier = Self::new();

        for pair in raw.split(',').map(str::trim).filter(|pair| !pair.is_empty()) {
            let (token, identity) = pair.split_once('=').ok_or_else(|| {
                AppError::InvalidArgument(format!("session entry {pair:?} is missing '='"))
            })?;
            let (role, party) = identity.split_once(':').ok_or_else(|| {
                AppError::InvalidArgument(format!("session entry {pair:?} is missing ':'"))
            })?;

            let role = match role.trim() {
                "courier" => Role::Courier,
                "customer" => Role::Customer,
                other => {
                    return Err(AppError::InvalidArgument(format!(
                        "unknown session role {other:?}, expected courier or customer"
                    )));
                }
            };
            let party_id = party
                .trim()
                .parse::<Uuid>()
                .map_err(|err| AppError::InvalidArgument(format!("invalid party id: {err}")))?;

            verifier.insert(token.trim(), Session { party_id, role });
        }

        Ok(verifier)
    }

    pub fn insert(&self, token: impl Into<String>, session: Session) {
        self.sessions.insert(token.into(), session);
    }

    pub fn parties(&self, role: Role) -> Vec<Uuid> {
        self.sessions
            .iter()
            .filter(|entry| entry.value().role == role)
            .map(|entry| entry.value().party_id)
            .collect()
    }
}

#[async_trait]
impl SessionVerifier for StaticSessionVerifier {
    async fn verify(&self, token: &str) -> Result<Session, AppError> {
        self.sessions
            .get(token)
            .map(|entry| *entry.value())
            .ok_or_else(|| AppError::Unauthorized("invalid or expired session".to_string()))
    }
}
