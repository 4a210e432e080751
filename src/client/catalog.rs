//! Catalog search and the availability filter built on it.
//!
//! The filter asks a secondary catalog whether an identifier is already
//! published there. Lookups are retried immediately on transient errors;
//! if every attempt errors the identifier is treated as not catalogued,
//! so an unreliable catalog never causes work to be dropped.

use crate::models::{CatalogConfig, Identifier, RelayError, Result};
use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Answer given when every lookup attempt errored: not catalogued, so the job runs.
pub const FAIL_OPEN: bool = false;

/// Remote catalog search.
///
/// Errors are transient and retryable.
#[async_trait]
pub trait CatalogSearch: Send + Sync {
    /// Run `query` and return the textual form of the response.
    async fn search(&self, query: &str) -> Result<String>;
}

/// Catalog search over the InnerTube JSON API.
pub struct InnerTubeClient {
    client: reqwest::Client,
    base_url: String,
    client_name: String,
    client_version: String,
}

impl InnerTubeClient {
    /// Create a new search client.
    pub fn new(config: &CatalogConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(RelayError::Network)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client_name: config.client_name.clone(),
            client_version: config.client_version.clone(),
        })
    }

    fn headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers
    }
}

#[async_trait]
impl CatalogSearch for InnerTubeClient {
    async fn search(&self, query: &str) -> Result<String> {
        let url = format!("{}/search?prettyPrint=false", self.base_url);
        let body = json!({
            "context": {
                "client": {
                    "clientName": self.client_name,
                    "clientVersion": self.client_version,
                }
            },
            "query": query,
        });

        let response = self
            .client
            .post(&url)
            .headers(Self::headers())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RelayError::Catalog(format!(
                "search returned status {}",
                status.as_u16()
            )));
        }

        Ok(response.text().await?)
    }
}

/// Decides whether an identifier is already present in the catalog.
pub struct AvailabilityFilter {
    search: Arc<dyn CatalogSearch>,
    attempts: u32,
}

impl AvailabilityFilter {
    pub fn new(search: Arc<dyn CatalogSearch>, attempts: u32) -> Self {
        Self {
            search,
            attempts: attempts.max(1),
        }
    }

    /// Whether `identifier` is catalogued.
    ///
    /// Returns on the first response that is not an error. Never fails:
    /// exhausted attempts yield [`FAIL_OPEN`].
    pub async fn is_available(&self, identifier: &Identifier) -> bool {
        let query = search_query(identifier);

        for attempt in 1..=self.attempts {
            match self.search.search(&query).await {
                Ok(body) => {
                    let found = response_lists(&body, &query, identifier);
                    debug!(identifier = %identifier, attempt, found, "Catalog lookup");
                    return found;
                }
                Err(e) => {
                    warn!(
                        identifier = %identifier,
                        attempt,
                        attempts = self.attempts,
                        transient = e.is_transient(),
                        error = %e,
                        "Catalog lookup failed, retrying"
                    );
                }
            }
        }

        warn!(
            identifier = %identifier,
            attempts = self.attempts,
            "Catalog lookups exhausted, assuming not catalogued"
        );
        FAIL_OPEN
    }
}

fn search_query(identifier: &Identifier) -> String {
    format!("inurl:{identifier}")
}

/// A response lists the identifier if it carries one of its thumbnail URLs.
///
/// The query is stripped first so an echoed query never counts as a match.
fn response_lists(body: &str, query: &str, identifier: &Identifier) -> bool {
    let text = body.replace(query, "");
    text.contains(&format!("https://i.ytimg.com/vi/{identifier}"))
        || text.contains(&format!("https://i.ytimg.com/vi_webp/{identifier}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedCatalog;

    fn id(s: &str) -> Identifier {
        Identifier::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_four_errors_then_not_found_proceeds() {
        let catalog = Arc::new(ScriptedCatalog::new(vec![
            Err("timeout".into()),
            Err("timeout".into()),
            Err("503".into()),
            Err("reset".into()),
            Ok(r#"{"contents": []}"#.into()),
        ]));
        let filter = AvailabilityFilter::new(catalog.clone(), 5);

        assert!(!filter.is_available(&id("abc123")).await);
        assert_eq!(catalog.calls(), 5);
    }

    #[tokio::test]
    async fn test_first_response_returns_immediately() {
        let catalog = Arc::new(ScriptedCatalog::new(vec![Ok(
            r#"{"thumbnail": "https://i.ytimg.com/vi/abc123/hqdefault.jpg"}"#.into(),
        )]));
        let filter = AvailabilityFilter::new(catalog.clone(), 5);

        assert!(filter.is_available(&id("abc123")).await);
        assert_eq!(catalog.calls(), 1);
    }

    #[tokio::test]
    async fn test_all_attempts_error_fails_open() {
        let catalog = Arc::new(ScriptedCatalog::always_failing());
        let filter = AvailabilityFilter::new(catalog.clone(), 5);

        assert_eq!(filter.is_available(&id("abc123")).await, FAIL_OPEN);
        assert_eq!(catalog.calls(), 5);
    }

    #[test]
    fn test_webp_thumbnail_matches() {
        let ident = id("xyz");
        let query = search_query(&ident);
        assert!(response_lists(
            "... https://i.ytimg.com/vi_webp/xyz/maxres.webp ...",
            &query,
            &ident
        ));
    }

    #[test]
    fn test_other_identifier_thumbnail_does_not_match() {
        let ident = id("xyz");
        let query = search_query(&ident);
        assert!(!response_lists(
            "https://i.ytimg.com/vi/other/hqdefault.jpg inurl:xyz",
            &query,
            &ident
        ));
    }
}
