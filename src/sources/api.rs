//! API-style sources: structured JSON from paid provider endpoints.
//!
//! Providers wrap their payload in an envelope with a `code` field; a
//! non-success code is a hard error for the whole fetch. Individual rows
//! that fail to parse are logged and skipped.

use super::{Source, SOURCE_TIMEOUT};
use crate::error::{CorralError, Result};
use crate::models::{ProxyCandidate, ProxyProtocol, ProxyRegion, ProxyType};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

/// A paid JSON API source. The endpoint URL carries any credentials the
/// provider requires (bearer-URL template).
pub struct ApiSource {
    name: String,
    api_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    code: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: Option<EnvelopeData>,
}

/// Providers disagree on payload shape: some return structured rows, some a
/// wrapped list of `ip:port` strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EnvelopeData {
    Rows(Vec<serde_json::Value>),
    ProxyList { proxy_list: Vec<String> },
}

#[derive(Debug, Deserialize)]
struct ApiRow {
    ip: String,
    port: u16,
    #[serde(default)]
    anonymous: bool,
}

impl ApiSource {
    pub fn new(name: impl Into<String>, api_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            api_url: api_url.into(),
            client: reqwest::Client::builder()
                .timeout(SOURCE_TIMEOUT)
                .build()
                .expect("failed to build HTTP client"),
        }
    }

    fn source_error(&self, message: impl Into<String>) -> CorralError {
        CorralError::SourceError {
            source_name: self.name.clone(),
            message: message.into(),
        }
    }

    /// Parse an envelope body into candidates. Pulled out of `fetch` so the
    /// wire format is testable without a live provider.
    fn parse_envelope(&self, body: &str) -> Result<Vec<ProxyCandidate>> {
        let envelope: Envelope = serde_json::from_str(body)
            .map_err(|e| self.source_error(format!("malformed envelope: {e}")))?;

        // Success code differs per provider (0 or 200)
        if envelope.code != 0 && envelope.code != 200 {
            return Err(self.source_error(format!(
                "provider error code {}: {}",
                envelope.code, envelope.msg
            )));
        }

        let mut candidates = Vec::new();

        match envelope.data {
            Some(EnvelopeData::Rows(rows)) => {
                for row in rows {
                    match serde_json::from_value::<ApiRow>(row) {
                        Ok(row) => candidates.push(self.candidate(
                            row.ip,
                            row.port,
                            row.anonymous,
                        )),
                        Err(e) => {
                            warn!(source = %self.name, error = %e, "Skipping malformed row");
                        }
                    }
                }
            }
            Some(EnvelopeData::ProxyList { proxy_list }) => {
                for entry in proxy_list {
                    match parse_endpoint(&entry) {
                        Some((ip, port)) => candidates.push(self.candidate(ip, port, true)),
                        None => {
                            warn!(source = %self.name, entry = %entry, "Skipping malformed endpoint");
                        }
                    }
                }
            }
            None => {}
        }

        Ok(candidates)
    }

    fn candidate(&self, ip: String, port: u16, anonymous: bool) -> ProxyCandidate {
        ProxyCandidate {
            ip,
            port,
            protocol: ProxyProtocol::Http,
            proxy_type: ProxyType::Long,
            region: ProxyRegion::Cn,
            source: self.name.clone(),
            anonymous,
            speed: None,
        }
    }
}

#[async_trait]
impl Source for ApiSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<Vec<ProxyCandidate>> {
        debug!(source = %self.name, url = %self.api_url, "Fetching from provider API");

        let body = self
            .client
            .get(&self.api_url)
            .send()
            .await?
            .text()
            .await?;

        let candidates = self.parse_envelope(&body)?;

        info!(
            source = %self.name,
            count = candidates.len(),
            "Fetched candidates from provider API"
        );

        Ok(candidates)
    }
}

/// Split an `ip:port` string
fn parse_endpoint(entry: &str) -> Option<(String, u16)> {
    let (ip, port) = entry.split_once(':')?;
    if ip.is_empty() {
        return None;
    }
    let port = port.parse::<u16>().ok()?;
    Some((ip.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_envelope_structured_rows() {
        let source = ApiSource::new("wandou", "https://provider.example/api");

        let body = r#"{
            "code": 200,
            "msg": "ok",
            "data": [
                {"ip": "1.2.3.4", "port": 8080, "anonymous": true},
                {"ip": "5.6.7.8", "port": 3128, "anonymous": false}
            ]
        }"#;

        let candidates = source.parse_envelope(body).unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].ip, "1.2.3.4");
        assert_eq!(candidates[0].port, 8080);
        assert!(candidates[0].anonymous);
        assert_eq!(candidates[0].source, "wandou");
        assert!(!candidates[1].anonymous);
    }

    #[test]
    fn test_parse_envelope_proxy_list() {
        let source = ApiSource::new("kuaidaili", "https://provider.example/api");

        let body = r#"{
            "code": 0,
            "msg": "",
            "data": {"proxy_list": ["9.9.9.9:1080", "8.8.8.8:80"], "count": 2}
        }"#;

        let candidates = source.parse_envelope(body).unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].ip, "9.9.9.9");
        assert_eq!(candidates[0].port, 1080);
        assert_eq!(candidates[1].ip, "8.8.8.8");
        assert_eq!(candidates[1].port, 80);
    }

    #[test]
    fn test_parse_envelope_provider_error_is_hard() {
        let source = ApiSource::new("paid_1", "https://provider.example/api");

        let body = r#"{"code": 10047, "msg": "balance exhausted"}"#;
        let err = source.parse_envelope(body).unwrap_err();
        assert!(matches!(err, CorralError::SourceError { .. }));
        assert!(err.to_string().contains("balance exhausted"));
    }

    #[test]
    fn test_parse_envelope_skips_bad_rows() {
        let source = ApiSource::new("paid_1", "https://provider.example/api");

        let body = r#"{
            "code": 200,
            "data": [
                {"ip": "1.2.3.4", "port": 8080},
                {"ip": "no-port-here"},
                {"port": 99999}
            ]
        }"#;

        let candidates = source.parse_envelope(body).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].ip, "1.2.3.4");
    }

    #[test]
    fn test_parse_envelope_skips_bad_list_entries() {
        let source = ApiSource::new("paid_1", "https://provider.example/api");

        let body = r#"{
            "code": 0,
            "data": {"proxy_list": ["1.1.1.1:80", "garbage", ":1080", "2.2.2.2:notaport"]}
        }"#;

        let candidates = source.parse_envelope(body).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].ip, "1.1.1.1");
    }

    #[test]
    fn test_parse_endpoint() {
        assert_eq!(
            parse_endpoint("1.2.3.4:8080"),
            Some(("1.2.3.4".to_string(), 8080))
        );
        assert_eq!(parse_endpoint("1.2.3.4"), None);
        assert_eq!(parse_endpoint(":8080"), None);
        assert_eq!(parse_endpoint("1.2.3.4:0x50"), None);
    }
}
