use std::env;
use std::time::Duration;

use crate::error::AppError;

#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Compact,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub search_radius_km: f64,
    pub candidate_count: usize,
    pub presence_ttl: Duration,
    pub claim_ttl: Duration,
    pub transit_delay: Duration,
    pub sweep_interval: Duration,
    pub history_max_limit: u32,
    pub event_buffer_size: usize,
    pub ingest_max_attempts: u32,
    pub earnings_currency: String,
    pub order_service_url: Option<String>,
    pub session_tokens: String,
    /// Bearer token for internal callers of `/events` and re-dispatch.
    pub service_token: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Compact,
            search_radius_km: 5.0,
            candidate_count: 10,
            presence_ttl: Duration::from_secs(300),
            claim_ttl: Duration::from_secs(300),
            transit_delay: Duration::from_secs(120),
            sweep_interval: Duration::from_secs(5),
            history_max_limit: 100,
            event_buffer_size: 1024,
            ingest_max_attempts: 5,
            earnings_currency: "USD".to_string(),
            order_service_url: None,
            session_tokens: String::new(),
            service_token: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();

        let log_format = match env::var("LOG_FORMAT") {
            Ok(raw) if raw.eq_ignore_ascii_case("json") => LogFormat::Json,
            Ok(raw) if raw.eq_ignore_ascii_case("compact") => LogFormat::Compact,
            Ok(raw) => {
                return Err(AppError::InvalidArgument(format!(
                    "invalid LOG_FORMAT: {raw}, expected compact or json"
                )));
            }
            Err(_) => defaults.log_format,
        };

        let config = Self {
            http_port: parse_or_default("HTTP_PORT", defaults.http_port)?,
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            log_format,
            search_radius_km: parse_or_default("SEARCH_RADIUS_KM", defaults.search_radius_km)?,
            candidate_count: parse_or_default("CANDIDATE_COUNT", defaults.candidate_count)?,
            presence_ttl: secs_or_default("PRESENCE_TTL_SECS", defaults.presence_ttl)?,
            claim_ttl: secs_or_default("CLAIM_TTL_SECS", defaults.claim_ttl)?,
            transit_delay: secs_or_default("TRANSIT_DELAY_SECS", defaults.transit_delay)?,
            sweep_interval: secs_or_default("SWEEP_INTERVAL_SECS", defaults.sweep_interval)?,
            history_max_limit: parse_or_default("HISTORY_MAX_LIMIT", defaults.history_max_limit)?,
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", defaults.event_buffer_size)?,
            ingest_max_attempts: parse_or_default(
                "INGEST_MAX_ATTEMPTS",
                defaults.ingest_max_attempts,
            )?,
            earnings_currency: env::var("EARNINGS_CURRENCY").unwrap_or(defaults.earnings_currency),
            order_service_url: env::var("ORDER_SERVICE_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            session_tokens: env::var("SESSION_TOKENS").unwrap_or_default(),
            service_token: env::var("SERVICE_TOKEN")
                .ok()
                .map(|token| token.trim().to_string())
                .filter(|token| !token.is_empty()),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if !self.search_radius_km.is_finite() || self.search_radius_km <= 0.0 {
            return Err(AppError::InvalidArgument(
                "SEARCH_RADIUS_KM must be > 0".to_string(),
            ));
        }
        if self.candidate_count == 0 {
            return Err(AppError::InvalidArgument(
                "CANDIDATE_COUNT must be > 0".to_string(),
            ));
        }
        if self.history_max_limit == 0 {
            return Err(AppError::InvalidArgument(
                "HISTORY_MAX_LIMIT must be > 0".to_string(),
            ));
        }
        if self.event_buffer_size == 0 {
            return Err(AppError::InvalidArgument(
                "EVENT_BUFFER_SIZE must be > 0".to_string(),
            ));
        }
        if self.ingest_max_attempts == 0 {
            return Err(AppError::InvalidArgument(
                "INGEST_MAX_ATTEMPTS must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::InvalidArgument(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}

fn secs_or_default(key: &str, default: Duration) -> Result<Duration, AppError> {
    let secs = parse_or_default(key, default.as_secs())?;
    if secs == 0 {
        return Err(AppError::InvalidArgument(format!("{key} must be > 0")));
    }
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::Config;
    use crate::error::AppError;

    #[test]
    fn defaults_are_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn zero_history_limit_is_rejected() {
        let config = Config {
            history_max_limit: 0,
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(AppError::InvalidArgument(_))
        ));
    }

    #[test]
    fn non_positive_radius_and_counts_are_rejected() {
        for config in [
            Config {
                search_radius_km: 0.0,
                ..Config::default()
            },
            Config {
                search_radius_km: f64::NAN,
                ..Config::default()
            },
            Config {
                candidate_count: 0,
                ..Config::default()
            },
            Config {
                ingest_max_attempts: 0,
                ..Config::default()
            },
        ] {
            assert!(config.validate().is_err());
        }
    }
}
