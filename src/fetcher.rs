use reqwest::header::{HeaderMap, HeaderValue, COOKIE};
use reqwest::{StatusCode, Url};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::AppError;
use crate::models::ListingPage;

/// Page size requested from upstream.
pub const PAGE_LIMIT: u32 = 100;
const SORT_ORDER: &str = "Desc";
const USER_AGENT: &str = concat!("vipscan/", env!("CARGO_PKG_VERSION"));

/// Result of asking upstream for one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Success(ListingPage),
    /// HTTP 429. Nothing was consumed; the caller picks the retry policy.
    RateLimited,
    /// The request did not produce a usable page. Never retried automatically.
    TransportError(String),
}

/// Source of listing pages, one cursor at a time.
pub trait PageSource: Send + Sync {
    /// Fetches the page at `cursor`; the empty string is the first page.
    fn fetch(&self, cursor: &str) -> impl Future<Output = FetchOutcome> + Send;
}

/// Fetches pages from the upstream listing endpoint over HTTP.
#[derive(Debug, Clone)]
pub struct HttpPageFetcher {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpPageFetcher {
    pub fn new(
        endpoint: &str,
        cookie: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, AppError> {
        let endpoint =
            Url::parse(endpoint).map_err(|e| AppError::InvalidUrl(format!("{endpoint}: {e}")))?;

        let mut headers = HeaderMap::new();
        if let Some(cookie) = cookie.filter(|c| !c.is_empty()) {
            debug!("upstream cookie configured, sending it with every request");
            headers.insert(COOKIE, HeaderValue::from_str(cookie)?);
        }

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(Self { client, endpoint })
    }

    fn page_url(&self, cursor: &str) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("limit", &PAGE_LIMIT.to_string())
            .append_pair("sortOrder", SORT_ORDER)
            .append_pair("excludeFullGames", "false")
            .append_pair("cursor", cursor);
        url
    }
}

impl PageSource for HttpPageFetcher {
    async fn fetch(&self, cursor: &str) -> FetchOutcome {
        let url = self.page_url(cursor);
        debug!(%url, "fetching listing page");

        let resp = match self.client.get(url).send().await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(error = %e, "listing request failed");
                return FetchOutcome::TransportError(format!("network error: {e}"));
            }
        };

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return FetchOutcome::RateLimited;
        }
        if !status.is_success() {
            warn!(%status, "listing request rejected");
            return FetchOutcome::TransportError(format!("upstream returned {status}"));
        }

        match resp.json::<ListingPage>().await {
            Ok(page) => FetchOutcome::Success(page),
            Err(e) => {
                warn!(error = %e, "listing response could not be decoded");
                FetchOutcome::TransportError(format!("invalid response: {e}"))
            }
        }
    }
}
