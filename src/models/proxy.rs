use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Proxy protocol type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ProxyProtocol {
    Http,
    Https,
    Socks5,
}

impl ProxyProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyProtocol::Http => "http",
            ProxyProtocol::Https => "https",
            ProxyProtocol::Socks5 => "socks5",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "http" => Some(ProxyProtocol::Http),
            "https" => Some(ProxyProtocol::Https),
            "socks5" => Some(ProxyProtocol::Socks5),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProxyProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Proxy lifetime/anonymity class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ProxyType {
    Temp,
    Long,
    Anon,
    HighAnon,
}

impl ProxyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyType::Temp => "temp",
            ProxyType::Long => "long",
            ProxyType::Anon => "anon",
            ProxyType::HighAnon => "high_anon",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "temp" => Some(ProxyType::Temp),
            "long" => Some(ProxyType::Long),
            "anon" => Some(ProxyType::Anon),
            "high_anon" => Some(ProxyType::HighAnon),
            _ => None,
        }
    }

    /// Whether this class implies the proxy hides the client address
    pub fn is_anonymous(&self) -> bool {
        matches!(self, ProxyType::Anon | ProxyType::HighAnon)
    }

    /// Maximum age since last successful check before the proxy is expired
    pub fn ttl(&self) -> Duration {
        match self {
            ProxyType::Temp => Duration::minutes(30),
            ProxyType::Long => Duration::hours(24),
            ProxyType::Anon | ProxyType::HighAnon => Duration::hours(1),
        }
    }
}

impl std::fmt::Display for ProxyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Coarse region bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ProxyRegion {
    Cn,
    Other,
}

impl ProxyRegion {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyRegion::Cn => "cn",
            ProxyRegion::Other => "other",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "cn" => Some(ProxyRegion::Cn),
            "other" => Some(ProxyRegion::Other),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProxyRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Proxy entity, unique by `(ip, port)` among live rows
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Proxy {
    pub id: i64,
    pub ip: String,
    pub port: i32,
    pub protocol: ProxyProtocol,
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub proxy_type: ProxyType,
    pub region: ProxyRegion,
    pub source: String,
    pub anonymous: bool,
    /// Exponentially-weighted average response time in milliseconds
    pub speed: i64,
    pub success: i64,
    pub failure: i64,
    /// Consecutive validation failures; resets on any success
    pub fail_count: i32,
    pub use_count: i64,
    pub concurrent_use: i32,
    pub max_concurrent: i32,
    pub score: f64,
    pub available: bool,
    pub last_check: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing, default)]
    pub deleted_at: Option<DateTime<Utc>>,
    /// Optimistic-lock counter
    #[serde(skip_serializing, default)]
    pub version: i32,
}

impl Proxy {
    /// Calculate success rate as a percentage
    pub fn success_rate(&self) -> f64 {
        let total = self.success + self.failure;
        if total == 0 {
            0.0
        } else {
            (self.success as f64 / total as f64) * 100.0
        }
    }

    /// Recompute the composite score from success rate and speed.
    /// Success rate weighs 70%, speed 30%; result clamped to [0, 100].
    pub fn recompute_score(&mut self) {
        let success_rate = self.success_rate();

        let speed_score = if self.speed > 0 {
            (100.0 - self.speed as f64 / 10.0).max(0.0)
        } else {
            100.0
        };

        self.score = (success_rate * 0.7 + speed_score * 0.3).clamp(0.0, 100.0);
    }

    /// Blend a newly observed response time into the running average.
    /// The first observation sets the value directly.
    pub fn blend_speed(&mut self, observed_ms: i64) {
        if self.speed == 0 {
            self.speed = observed_ms;
        } else {
            self.speed = (self.speed as f64 * 0.7 + observed_ms as f64 * 0.3).round() as i64;
        }
    }

    /// Whether the proxy has outlived its type TTL since the last check
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.last_check > self.proxy_type.ttl()
    }

    /// Proxy URL, e.g. `http://1.2.3.4:8080`
    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.ip, self.port)
    }
}

impl std::fmt::Display for Proxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.url())
    }
}

/// A candidate pulled from an upstream source. Health fields are never
/// trusted from sources; a candidate only becomes a `Proxy` after it
/// survives validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyCandidate {
    pub ip: String,
    pub port: u16,
    pub protocol: ProxyProtocol,
    #[serde(rename = "type")]
    pub proxy_type: ProxyType,
    pub region: ProxyRegion,
    pub source: String,
    pub anonymous: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<i64>,
}

impl ProxyCandidate {
    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.ip, self.port)
    }
}

/// Request body for creating a proxy through the API
#[derive(Debug, Clone, Deserialize)]
pub struct CreateProxyRequest {
    pub ip: String,
    pub port: u16,
    pub protocol: ProxyProtocol,
    #[serde(rename = "type")]
    pub proxy_type: ProxyType,
    #[serde(default = "default_region")]
    pub region: ProxyRegion,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub anonymous: bool,
    #[serde(default)]
    pub speed: i64,
}

fn default_region() -> ProxyRegion {
    ProxyRegion::Other
}

/// Request body for updating a proxy through the API
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateProxyRequest {
    pub protocol: Option<ProxyProtocol>,
    #[serde(rename = "type")]
    pub proxy_type: Option<ProxyType>,
    pub region: Option<ProxyRegion>,
    pub available: Option<bool>,
    pub speed: Option<i64>,
}

/// Consumer feedback body for `POST /api/proxy/:id/status`
#[derive(Debug, Clone, Deserialize)]
pub struct StatusReport {
    pub success: bool,
    #[serde(default)]
    pub speed: i64,
}

/// Aggregated pool statistics for `GET /api/stats`
#[derive(Debug, Clone, Default, Serialize)]
pub struct PoolStats {
    pub total_proxies: i64,
    pub available_proxies: i64,
    pub success_rate: f64,
    pub proxy_types: TypeCounts,
    pub source_stats: Vec<SourceStat>,
    pub speed_stats: SpeedBuckets,
    pub update_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TypeCounts {
    pub temporary: i64,
    pub long_term: i64,
    pub anonymous: i64,
    pub high_anon: i64,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct SourceStat {
    pub source: String,
    pub count: i64,
    pub available: i64,
}

/// Response-time distribution: fast <1s, medium 1-3s, slow >=3s
#[derive(Debug, Clone, Default, Serialize)]
pub struct SpeedBuckets {
    pub fast: i64,
    pub medium: i64,
    pub slow: i64,
}
