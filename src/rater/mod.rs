// src/rater/mod.rs
pub mod client;

pub use client::JsonRpcRater;

use crate::error::EngineError;
use crate::models::cdr::Cdr;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Charge request for one slice of a call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallDescriptor {
    #[serde(rename = "TOR")]
    pub tor: String,
    #[serde(rename = "ReqType")]
    pub req_type: String,
    #[serde(rename = "Direction")]
    pub direction: String,
    #[serde(rename = "Tenant")]
    pub tenant: String,
    #[serde(rename = "Category")]
    pub category: String,
    #[serde(rename = "Account")]
    pub account: String,
    #[serde(rename = "Subject")]
    pub subject: String,
    #[serde(rename = "Destination")]
    pub destination: String,
    #[serde(rename = "TimeStart")]
    pub time_start: DateTime<Utc>,
    #[serde(rename = "TimeEnd")]
    pub time_end: DateTime<Utc>,
    /// Total call time already charged, so the rater can pick the
    /// right rate interval for this slice.
    #[serde(rename = "DurationIndex", with = "secs_f64")]
    pub duration_index: Duration,
}

impl CallDescriptor {
    pub fn slice_duration(&self) -> Duration {
        (self.time_end - self.time_start)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

/// Cost fragment returned by the rater for one charged slice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallCost {
    #[serde(rename = "TOR", default)]
    pub tor: String,
    #[serde(rename = "Direction", default)]
    pub direction: String,
    #[serde(rename = "Tenant", default)]
    pub tenant: String,
    #[serde(rename = "Category", default)]
    pub category: String,
    #[serde(rename = "Account", default)]
    pub account: String,
    #[serde(rename = "Subject", default)]
    pub subject: String,
    #[serde(rename = "Destination", default)]
    pub destination: String,
    #[serde(rename = "Cost")]
    pub cost: f64,
    #[serde(rename = "Duration", with = "secs_f64", default)]
    pub duration: Duration,
}

impl CallCost {
    pub fn for_descriptor(cd: &CallDescriptor, cost: f64) -> Self {
        Self {
            tor: cd.tor.clone(),
            direction: cd.direction.clone(),
            tenant: cd.tenant.clone(),
            category: cd.category.clone(),
            account: cd.account.clone(),
            subject: cd.subject.clone(),
            destination: cd.destination.clone(),
            cost,
            duration: cd.slice_duration(),
        }
    }
}

mod secs_f64 {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(serde::de::Error::custom("negative duration"));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}

/// Pricing collaborator. Implementations are remote raters behind
/// JSON-RPC or the round-robin pool fanning out over several of them.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Rater: Send + Sync {
    /// Charges the account for the descriptor's slice and returns the
    /// resulting cost fragment.
    async fn debit(&self, cd: &CallDescriptor) -> Result<CallCost, EngineError>;

    /// Prices the slice without touching the balance.
    async fn get_cost(&self, cd: &CallDescriptor) -> Result<CallCost, EngineError>;

    /// Returns already-debited amounts for the descriptor's slice to
    /// the account.
    async fn refund_increments(&self, cd: &CallDescriptor) -> Result<(), EngineError>;

    /// Remaining affordable session time, in seconds.
    async fn max_session_time(&self, cd: &CallDescriptor) -> Result<f64, EngineError>;

    /// Remaining session time across derived charging runs, in seconds.
    async fn derived_max_session_time(&self, cdr: &Cdr) -> Result<f64, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn descriptor() -> CallDescriptor {
        let start = Utc.with_ymd_and_hms(2013, 11, 7, 8, 42, 26).unwrap();
        CallDescriptor {
            tor: "*voice".to_string(),
            req_type: "*prepaid".to_string(),
            direction: "*out".to_string(),
            tenant: "voxtelecom.org".to_string(),
            category: "call".to_string(),
            account: "1001".to_string(),
            subject: "1001".to_string(),
            destination: "1002".to_string(),
            time_start: start,
            time_end: start + chrono::Duration::seconds(10),
            duration_index: Duration::from_secs(10),
        }
    }

    #[test]
    fn test_slice_duration() {
        assert_eq!(descriptor().slice_duration(), Duration::from_secs(10));
    }

    #[test]
    fn test_call_cost_for_descriptor() {
        let cd = descriptor();
        let cc = CallCost::for_descriptor(&cd, 0.42);
        assert_eq!(cc.cost, 0.42);
        assert_eq!(cc.duration, Duration::from_secs(10));
        assert_eq!(cc.account, "1001");
    }

    #[test]
    fn test_descriptor_serde_round_trip() {
        let cd = descriptor();
        let json = serde_json::to_string(&cd).unwrap();
        assert!(json.contains("\"DurationIndex\":10.0"));
        let back: CallDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(back.duration_index, cd.duration_index);
        assert_eq!(back.time_end, cd.time_end);
    }
}
