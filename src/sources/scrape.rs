//! Scrape-style sources: HTML tables from free proxy listing sites.
//!
//! Paginated over a fixed URL list. A page that fails to load or parse is
//! logged and skipped; the fetch only fails as a whole when no page yielded
//! a single candidate.

use super::{Source, SOURCE_TIMEOUT};
use crate::error::{CorralError, Result};
use crate::models::{ProxyCandidate, ProxyProtocol, ProxyRegion, ProxyType};
use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, info, warn};

/// A free listing-site scraper over a fixed set of table pages
pub struct TableScrapeSource {
    name: String,
    page_urls: Vec<String>,
    region: ProxyRegion,
    row_pattern: Regex,
    client: reqwest::Client,
}

impl TableScrapeSource {
    pub fn new(
        name: impl Into<String>,
        page_urls: Vec<String>,
        region: ProxyRegion,
    ) -> Self {
        // Cells in order: ip, port, anonymity label, protocol
        let row_pattern = Regex::new(
            r"(?s)<td>(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})</td>.*?<td>(\d+)</td>.*?<td>([^<]+)</td>.*?<td>([^<]+)</td>",
        )
        .expect("invalid row pattern");

        Self {
            name: name.into(),
            page_urls,
            region,
            row_pattern,
            client: reqwest::Client::builder()
                .timeout(SOURCE_TIMEOUT)
                .build()
                .expect("failed to build HTTP client"),
        }
    }

    /// The ip3366 free listing site
    pub fn ip3366() -> Self {
        Self::new(
            "ip3366",
            vec![
                "http://www.ip3366.net/free/?stype=1".to_string(),
                "http://www.ip3366.net/free/?stype=2".to_string(),
            ],
            ProxyRegion::Cn,
        )
    }

    /// Extract candidates from one page of table markup
    fn parse_table(&self, html: &str) -> Vec<ProxyCandidate> {
        let mut candidates = Vec::new();

        for captures in self.row_pattern.captures_iter(html) {
            let ip = captures[1].to_string();
            let port = match captures[2].parse::<u16>() {
                Ok(p) => p,
                Err(_) => {
                    warn!(source = %self.name, port = &captures[2], "Skipping row with bad port");
                    continue;
                }
            };

            let anonymity = captures[3].trim();
            let proxy_type = classify_anonymity(anonymity);

            let protocol = ProxyProtocol::from_str(captures[4].trim())
                .unwrap_or(ProxyProtocol::Http);

            candidates.push(ProxyCandidate {
                ip,
                port,
                protocol,
                proxy_type,
                region: self.region,
                source: self.name.clone(),
                anonymous: proxy_type.is_anonymous(),
                speed: None,
            });
        }

        candidates
    }
}

#[async_trait]
impl Source for TableScrapeSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<Vec<ProxyCandidate>> {
        let mut all = Vec::new();

        for url in &self.page_urls {
            debug!(source = %self.name, url = %url, "Scraping page");

            let html = match self.client.get(url).send().await {
                Ok(resp) => match resp.text().await {
                    Ok(body) => body,
                    Err(e) => {
                        warn!(source = %self.name, url = %url, error = %e, "Failed to read page");
                        continue;
                    }
                },
                Err(e) => {
                    warn!(source = %self.name, url = %url, error = %e, "Failed to load page");
                    continue;
                }
            };

            let candidates = self.parse_table(&html);
            debug!(source = %self.name, url = %url, count = candidates.len(), "Parsed page");
            all.extend(candidates);
        }

        if all.is_empty() {
            return Err(CorralError::SourceError {
                source_name: self.name.clone(),
                message: "no page yielded any candidate".to_string(),
            });
        }

        info!(source = %self.name, count = all.len(), "Scraped candidates");
        Ok(all)
    }
}

/// Map an anonymity-label cell to a proxy class
fn classify_anonymity(label: &str) -> ProxyType {
    if label.contains("高匿") || label.to_lowercase().contains("elite") {
        ProxyType::HighAnon
    } else if label.contains("匿名") || label.to_lowercase().contains("anonymous") {
        ProxyType::Anon
    } else {
        ProxyType::Temp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_PAGE: &str = r#"
        <table>
          <tr>
            <td>110.12.13.14</td>
            <td>8080</td>
            <td>高匿代理IP</td>
            <td>HTTP</td>
            <td>something</td>
          </tr>
          <tr>
            <td>120.21.22.23</td>
            <td>3128</td>
            <td>匿名</td>
            <td>HTTPS</td>
            <td>something</td>
          </tr>
          <tr>
            <td>130.31.32.33</td>
            <td>80</td>
            <td>透明</td>
            <td>HTTP</td>
            <td>something</td>
          </tr>
        </table>
    "#;

    #[test]
    fn test_parse_table_classifies_rows() {
        let source = TableScrapeSource::ip3366();
        let candidates = source.parse_table(SAMPLE_PAGE);

        assert_eq!(candidates.len(), 3);

        assert_eq!(candidates[0].ip, "110.12.13.14");
        assert_eq!(candidates[0].port, 8080);
        assert_eq!(candidates[0].proxy_type, ProxyType::HighAnon);
        assert!(candidates[0].anonymous);
        assert_eq!(candidates[0].protocol, ProxyProtocol::Http);

        assert_eq!(candidates[1].proxy_type, ProxyType::Anon);
        assert_eq!(candidates[1].protocol, ProxyProtocol::Https);
        assert!(candidates[1].anonymous);

        assert_eq!(candidates[2].proxy_type, ProxyType::Temp);
        assert!(!candidates[2].anonymous);

        for c in &candidates {
            assert_eq!(c.source, "ip3366");
            assert_eq!(c.region, ProxyRegion::Cn);
            assert!(c.speed.is_none());
        }
    }

    #[test]
    fn test_parse_table_empty_page() {
        let source = TableScrapeSource::ip3366();
        assert!(source.parse_table("<html><body>nothing here</body></html>").is_empty());
    }

    #[test]
    fn test_parse_table_skips_row_with_oversized_port() {
        let source = TableScrapeSource::ip3366();
        let html = r#"
            <td>1.2.3.4</td>
            <td>99999</td>
            <td>高匿</td>
            <td>HTTP</td>
        "#;
        assert!(source.parse_table(html).is_empty());
    }

    #[test]
    fn test_classify_anonymity() {
        assert_eq!(classify_anonymity("高匿代理IP"), ProxyType::HighAnon);
        assert_eq!(classify_anonymity("Elite proxy"), ProxyType::HighAnon);
        assert_eq!(classify_anonymity("匿名"), ProxyType::Anon);
        assert_eq!(classify_anonymity("anonymous"), ProxyType::Anon);
        assert_eq!(classify_anonymity("透明"), ProxyType::Temp);
        assert_eq!(classify_anonymity(""), ProxyType::Temp);
    }
}
