use std::time::Duration;

use anyhow::Context as _;
use reqwest::header::{ACCEPT, USER_AGENT};
use tokio::time::Instant;
use url::Url;

use crate::extract::{self, PageProbe};

/// Format filter the catalog search is locked to, matching the catalog's
/// own "books" facet.
const FORMAT_FILTER: &str = "BK|EBOOK|GRAPHIC_NOVEL|LPRINT|BOARD_BK|PAPERBACK";

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Retryable: network trouble, 5xx, or a page that never rendered.
    #[error("transient fetch failure: {0}")]
    Transient(String),
    /// Terminal for this query, not an error: 4xx or an explicit
    /// zero-results page.
    #[error("query returned no results")]
    NotFound,
    /// Terminal: the catalog is serving an anti-automation interstitial.
    #[error("anti-automation interstitial detected")]
    Blocked,
}

/// One successfully fetched result page.
#[derive(Debug)]
pub struct RawPage {
    pub html: String,
    /// Total result count advertised by the pagination label, when present.
    pub advertised_total: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// How long to keep re-polling a page that has not rendered yet before
    /// classifying the fetch as transient.
    pub readiness_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            readiness_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(250),
        }
    }
}

/// Issues one catalog search-page request at a time. Owns its HTTP client;
/// nothing here is process-global.
pub struct PageFetcher {
    client: reqwest::Client,
    base_url: Url,
    config: FetcherConfig,
}

enum Poll {
    Page(RawPage),
    NotRenderedYet,
}

impl PageFetcher {
    pub fn new(base_url: Url, config: FetcherConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .context("build catalog http client")?;

        Ok(Self {
            client,
            base_url,
            config,
        })
    }

    pub fn search_url(&self, query: &str, page: u32) -> Url {
        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .clear()
            .append_pair("query", query)
            .append_pair("searchType", "tag")
            .append_pair("locked", "true")
            .append_pair("f_FORMAT", FORMAT_FILTER)
            .append_pair("page", &page.to_string());
        url
    }

    /// Fetch one result page (`page >= 1`). The catalog renders results
    /// client-side, so a body without content is re-polled until the
    /// readiness timeout, then reported as `Transient`.
    pub async fn fetch(&self, query: &str, page: u32) -> Result<RawPage, FetchError> {
        let url = self.search_url(query, page);
        let deadline = Instant::now() + self.config.readiness_timeout;

        loop {
            match self.fetch_once(&url).await? {
                Poll::Page(raw) => return Ok(raw),
                Poll::NotRenderedYet => {
                    if Instant::now() + self.config.poll_interval > deadline {
                        return Err(FetchError::Transient(format!(
                            "page {page} did not render within {:?}",
                            self.config.readiness_timeout
                        )));
                    }
                    tracing::debug!(page, "page not rendered yet; polling again");
                    tokio::time::sleep(self.config.poll_interval).await;
                }
            }
        }
    }

    async fn fetch_once(&self, url: &Url) -> Result<Poll, FetchError> {
        let response = self
            .client
            .get(url.clone())
            .header(USER_AGENT, concat!("bibliostat/", env!("CARGO_PKG_VERSION")))
            .header(ACCEPT, "text/html,application/xhtml+xml;q=0.9,*/*;q=0.8")
            .send()
            .await
            .map_err(|err| FetchError::Transient(format!("GET {url}: {err}")))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(FetchError::Transient(format!("GET {url}: HTTP {status}")));
        }
        if status == reqwest::StatusCode::FORBIDDEN
            || status == reqwest::StatusCode::TOO_MANY_REQUESTS
        {
            return Err(FetchError::Blocked);
        }
        if status.is_client_error() {
            return Err(FetchError::NotFound);
        }

        let html = response
            .text()
            .await
            .map_err(|err| FetchError::Transient(format!("read body of {url}: {err}")))?;

        match extract::probe(&html) {
            PageProbe::Ready => {
                let advertised_total = extract::advertised_total(&html);
                Ok(Poll::Page(RawPage {
                    html,
                    advertised_total,
                }))
            }
            PageProbe::NoResults => Err(FetchError::NotFound),
            PageProbe::Blocked => Err(FetchError::Blocked),
            PageProbe::Pending => Ok(Poll::NotRenderedYet),
        }
    }
}
