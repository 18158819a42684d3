use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::{Delivery, DeliveryStatus};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EarningsPeriod {
    Daily,
    Weekly,
    Monthly,
    Lifetime,
}

impl EarningsPeriod {
    /// Rolling window ending now; `None` for lifetime.
    pub fn window(&self) -> Option<Duration> {
        match self {
            EarningsPeriod::Daily => Some(Duration::days(1)),
            EarningsPeriod::Weekly => Some(Duration::days(7)),
            EarningsPeriod::Monthly => Some(Duration::days(30)),
            EarningsPeriod::Lifetime => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EarningsPeriod::Daily => "daily",
            EarningsPeriod::Weekly => "weekly",
            EarningsPeriod::Monthly => "monthly",
            EarningsPeriod::Lifetime => "lifetime",
        }
    }
}

impl FromStr for EarningsPeriod {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(EarningsPeriod::Daily),
            "weekly" => Ok(EarningsPeriod::Weekly),
            "monthly" => Ok(EarningsPeriod::Monthly),
            "lifetime" => Ok(EarningsPeriod::Lifetime),
            other => Err(AppError::InvalidArgument(format!(
                "unknown period: {other}, expected daily/weekly/monthly/lifetime"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Earnings {
    pub period: EarningsPeriod,
    pub earnings: f64,
    pub currency: String,
}

/// Sums delivery fees of DELIVERED records created inside the period window.
pub fn sum_fees(deliveries: &[Delivery], period: EarningsPeriod, now: DateTime<Utc>) -> f64 {
    let since = period.window().map(|window| now - window);

    deliveries
        .iter()
        .filter(|delivery| delivery.status == DeliveryStatus::Delivered)
        .filter(|delivery| since.is_none_or(|since| delivery.created_at >= since))
        .map(|delivery| delivery.delivery_fee)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::EarningsPeriod;
    use crate::error::AppError;

    #[test]
    fn parses_known_periods_case_insensitively() {
        assert_eq!("Weekly".parse::<EarningsPeriod>().unwrap(), EarningsPeriod::Weekly);
        assert_eq!("lifetime".parse::<EarningsPeriod>().unwrap(), EarningsPeriod::Lifetime);
    }

    #[test]
    fn unknown_period_is_invalid_argument() {
        let err = "fortnightly".parse::<EarningsPeriod>().unwrap_err();
        assert!(matches!(err, AppError::InvalidArgument(_)));
    }
}
