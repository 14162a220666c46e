use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Append-only usage record, written on every consumer feedback and every
/// validation probe. Telemetry only; never read on the dispense path.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ProxyUsage {
    pub id: i64,
    pub proxy_id: i64,
    pub success: bool,
    pub speed: i64,
    pub error_msg: Option<String>,
    pub target_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Payload for inserting a usage record
#[derive(Debug, Clone)]
pub struct NewProxyUsage {
    pub proxy_id: i64,
    pub success: bool,
    pub speed: i64,
    pub error_msg: Option<String>,
    pub target_url: Option<String>,
}

impl NewProxyUsage {
    pub fn probe(proxy_id: i64, success: bool, speed: i64, error_msg: Option<String>) -> Self {
        Self {
            proxy_id,
            success,
            speed,
            error_msg,
            target_url: None,
        }
    }

    pub fn feedback(proxy_id: i64, success: bool, speed: i64, target_url: Option<String>) -> Self {
        Self {
            proxy_id,
            success,
            speed,
            error_msg: None,
            target_url,
        }
    }
}
