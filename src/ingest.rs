use std::collections::HashSet;
use std::time::Duration;

use anyhow::Context as _;
use tokio_util::sync::CancellationToken;

use crate::extract::{self, WarningKind};
use crate::fetch::{FetchError, PageFetcher, RawPage};
use crate::store::LibraryStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// The transient-retry ceiling was exceeded on one page.
    FetchExhausted,
    /// The catalog served an anti-automation interstitial.
    Blocked,
    /// External cancellation between pages.
    Cancelled,
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            Self::FetchExhausted => "fetch retries exhausted",
            Self::Blocked => "blocked by the catalog",
            Self::Cancelled => "cancelled",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Aborted(AbortReason),
}

#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Fetch attempts per page before the run aborts with `FetchExhausted`.
    pub max_attempts: u32,
    /// First backoff delay; doubles per failed attempt.
    pub backoff_base: Duration,
    /// Hard page ceiling guarding against a wrong advertised total.
    pub max_pages: u32,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_millis(500),
            max_pages: 200,
        }
    }
}

/// End-of-run report. Warnings never abort a run; they are only counted
/// here. A run always ends `Completed` or `Aborted` with a reason.
#[derive(Debug)]
pub struct RunSummary {
    pub query: String,
    pub collected: u64,
    pub total: Option<u64>,
    pub pages_fetched: u32,
    pub degraded_fields: u64,
    pub discarded_records: u64,
    pub outcome: Outcome,
}

/// One invocation's progress; never persisted.
struct SearchSession {
    query: String,
    page: u32,
    collected: u64,
    total: Option<u64>,
    pages_fetched: u32,
    degraded_fields: u64,
    discarded_records: u64,
}

impl SearchSession {
    fn new(query: &str) -> Self {
        Self {
            query: query.to_owned(),
            page: 1,
            collected: 0,
            total: None,
            pages_fetched: 0,
            degraded_fields: 0,
            discarded_records: 0,
        }
    }

    fn into_summary(self, outcome: Outcome) -> RunSummary {
        RunSummary {
            query: self.query,
            collected: self.collected,
            total: self.total,
            pages_fetched: self.pages_fetched,
            degraded_fields: self.degraded_fields,
            discarded_records: self.discarded_records,
            outcome,
        }
    }
}

/// Entry point for the `scrape` subcommand. Opens the store and fetcher,
/// wires Ctrl-C into between-page cancellation, and runs one session.
pub async fn run(args: crate::cli::ScrapeArgs) -> anyhow::Result<()> {
    let base_url = url::Url::parse(&args.base_url).context("parse --base-url")?;
    if base_url.scheme() != "http" && base_url.scheme() != "https" {
        anyhow::bail!("--base-url must be http/https: {base_url}");
    }

    let fetcher = PageFetcher::new(
        base_url,
        crate::fetch::FetcherConfig {
            readiness_timeout: Duration::from_millis(args.readiness_timeout_ms),
            poll_interval: Duration::from_millis(args.poll_interval_ms),
        },
    )
    .context("build page fetcher")?;
    let store = LibraryStore::open(std::path::Path::new(&args.db)).context("open store")?;
    let options = IngestOptions {
        max_attempts: args.max_attempts,
        backoff_base: Duration::from_millis(args.backoff_ms),
        max_pages: args.max_pages,
    };

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_cancel.cancel();
        }
    });

    let summary = run_session(&fetcher, &store, &args.query, &options, &cancel).await?;

    let total = summary
        .total
        .map(|t| t.to_string())
        .unwrap_or_else(|| "?".to_owned());
    println!(
        "Scraped {} of {total} items for '{}' across {} pages.",
        summary.collected, summary.query, summary.pages_fetched
    );
    if summary.degraded_fields > 0 || summary.discarded_records > 0 {
        println!(
            "Warnings: {} degraded fields, {} discarded records.",
            summary.degraded_fields, summary.discarded_records
        );
    }

    match summary.outcome {
        Outcome::Completed => Ok(()),
        Outcome::Aborted(reason) => anyhow::bail!("scrape aborted: {reason}"),
    }
}

enum PageFetchOutcome {
    Page(RawPage),
    NoResults,
    Blocked,
    Exhausted,
}

/// Drive one ingestion run: fetch, extract, and store pages in strictly
/// increasing page order until the result set is exhausted or a terminal
/// condition occurs. Page N is fully stored before page N+1 is fetched.
pub async fn run_session(
    fetcher: &PageFetcher,
    store: &LibraryStore,
    query: &str,
    options: &IngestOptions,
    cancel: &CancellationToken,
) -> anyhow::Result<RunSummary> {
    anyhow::ensure!(!query.trim().is_empty(), "search query must be non-empty");

    let mut session = SearchSession::new(query);

    let outcome = loop {
        if cancel.is_cancelled() {
            tracing::warn!(query, page = session.page, "cancelled between pages");
            break Outcome::Aborted(AbortReason::Cancelled);
        }
        if session.page > options.max_pages {
            tracing::warn!(
                query,
                max_pages = options.max_pages,
                "page safety ceiling reached before the advertised total"
            );
            break Outcome::Completed;
        }

        let raw = match fetch_with_retry(fetcher, &mut session, options).await {
            PageFetchOutcome::Page(raw) => raw,
            PageFetchOutcome::NoResults => {
                // Zero results is a completed run, not an error; past the
                // first page it simply marks the end of the result set.
                if session.collected == 0 {
                    tracing::info!(query, "no results for query");
                }
                break Outcome::Completed;
            }
            PageFetchOutcome::Blocked => break Outcome::Aborted(AbortReason::Blocked),
            PageFetchOutcome::Exhausted => break Outcome::Aborted(AbortReason::FetchExhausted),
        };
        session.pages_fetched += 1;

        let extraction = extract::extract(&raw.html)
            .with_context(|| format!("extract page {}", session.page))?;
        if session.total.is_none() {
            session.total = raw.advertised_total;
        }
        for warning in &extraction.warnings {
            tracing::warn!(page = session.page, detail = %warning.detail, "extraction warning");
            match warning.kind {
                WarningKind::ParseDegraded => session.degraded_fields += 1,
                WarningKind::RecordDiscarded => session.discarded_records += 1,
            }
        }

        if extraction.books.is_empty() {
            break Outcome::Completed;
        }

        // Intra-page duplicates count once per unique link.
        let mut seen: HashSet<&str> = HashSet::new();
        for book in &extraction.books {
            if !seen.insert(book.link.as_str()) {
                continue;
            }
            store
                .upsert(query, book)
                .with_context(|| format!("store {}", book.link))?;
            session.collected += 1;
        }

        tracing::info!(
            query,
            page = session.page,
            collected = session.collected,
            total = session.total,
            "stored page"
        );

        if let Some(total) = session.total
            && session.collected >= total
        {
            break Outcome::Completed;
        }
        session.page += 1;
    };

    Ok(session.into_summary(outcome))
}

async fn fetch_with_retry(
    fetcher: &PageFetcher,
    session: &mut SearchSession,
    options: &IngestOptions,
) -> PageFetchOutcome {
    for attempt in 1..=options.max_attempts.max(1) {
        match fetcher.fetch(&session.query, session.page).await {
            Ok(raw) => return PageFetchOutcome::Page(raw),
            Err(FetchError::NotFound) => return PageFetchOutcome::NoResults,
            Err(FetchError::Blocked) => {
                tracing::error!(query = %session.query, page = session.page, "blocked by catalog");
                return PageFetchOutcome::Blocked;
            }
            Err(FetchError::Transient(reason)) => {
                if attempt == options.max_attempts.max(1) {
                    tracing::error!(
                        query = %session.query,
                        page = session.page,
                        attempt,
                        %reason,
                        "transient failures exhausted the retry ceiling"
                    );
                    return PageFetchOutcome::Exhausted;
                }
                let delay = backoff_delay(options.backoff_base, attempt);
                tracing::warn!(
                    query = %session.query,
                    page = session.page,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    %reason,
                    "transient fetch failure; backing off"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
    PageFetchOutcome::Exhausted
}

fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(1 << (attempt - 1).min(16))
}
