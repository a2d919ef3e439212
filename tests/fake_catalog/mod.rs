//! Local tiny_http stand-in for the catalog's search endpoint, shared by
//! the integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use url::Url;

use bibliostat::fetch::{FetcherConfig, PageFetcher};

pub struct FakeCatalog {
    pub base_url: String,
    hits: Arc<AtomicUsize>,
    shutdown: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl FakeCatalog {
    /// Serve `respond(page, request_index)` from a local tiny_http server.
    pub fn spawn<F>(respond: F) -> Self
    where
        F: Fn(u32, usize) -> (u16, String) + Send + 'static,
    {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start tiny_http server");
        let addr = server.server_addr();
        let base_url = format!("http://{addr}/v2/search");

        let hits = Arc::new(AtomicUsize::new(0));
        let server_hits = Arc::clone(&hits);
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let handle = thread::spawn(move || {
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }

                let request = match server.recv_timeout(Duration::from_millis(50)) {
                    Ok(Some(req)) => req,
                    Ok(None) => continue,
                    Err(_) => break,
                };

                let page = page_param(request.url());
                let hit = server_hits.fetch_add(1, Ordering::SeqCst);
                let (status, body) = respond(page, hit);
                let _ = request
                    .respond(tiny_http::Response::from_string(body).with_status_code(status));
            }
        });

        Self {
            base_url,
            hits,
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn fetcher(&self) -> PageFetcher {
        let base = Url::parse(&self.base_url).expect("parse fake catalog url");
        PageFetcher::new(
            base,
            FetcherConfig {
                readiness_timeout: Duration::from_millis(200),
                poll_interval: Duration::from_millis(10),
            },
        )
        .expect("build fetcher")
    }
}

impl Drop for FakeCatalog {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn page_param(url: &str) -> u32 {
    url.split("page=")
        .nth(1)
        .and_then(|rest| rest.split('&').next())
        .and_then(|value| value.parse().ok())
        .unwrap_or(1)
}

/// Minimal result card; title and rating are optional so tests can build
/// discarded or unrated candidates.
pub fn card(link: &str, title: Option<&str>, rating: Option<(f64, u64)>) -> String {
    let mut inner = format!(r#"<h2 class="cp-title"><a href="{link}">x</a></h2>"#);
    if let Some(title) = title {
        inner.push_str(&format!(r#"<span class="title-content">{title}</span>"#));
    }
    inner.push_str(r#"<span class="display-info-primary">BOOK, 2010</span>"#);
    if let Some((rating, votes)) = rating {
        inner.push_str(&format!(
            concat!(
                r#"<span class="cp-rating-stars rating-stars"><span>Rated {} out of 5</span></span>"#,
                r#"<span class="rating-count">({} ratings)</span>"#,
            ),
            rating, votes
        ));
    }
    format!(r#"<div class="cp-search-result-item-content">{inner}</div>"#)
}

/// Fully populated result card for end-to-end assertions on every field.
pub fn detailed_card(
    link: &str,
    title: &str,
    author: &str,
    display_info: &str,
    rating: (f64, u64),
) -> String {
    format!(
        concat!(
            r#"<div class="cp-search-result-item-content">"#,
            r#"<h2 class="cp-title"><a href="{link}">x</a></h2>"#,
            r#"<span class="title-content">{title}</span>"#,
            r#"<a class="author-link">{author}</a>"#,
            r#"<span class="display-info-primary">{info}</span>"#,
            r#"<span class="cp-rating-stars rating-stars"><span>Rated {stars} out of 5</span></span>"#,
            r#"<span class="rating-count">({votes} ratings)</span>"#,
            r#"</div>"#,
        ),
        link = link,
        title = title,
        author = author,
        info = display_info,
        stars = rating.0,
        votes = rating.1,
    )
}

pub fn results_page(total: u64, cards: &[String]) -> String {
    format!(
        concat!(
            "<html><body>",
            r#"<span class="cp-pagination-label">1 to {} of {} results</span>"#,
            "{}",
            "</body></html>"
        ),
        cards.len(),
        total,
        cards.join("")
    )
}

/// Ten distinct rated cards for one page.
pub fn full_page(page: u32) -> Vec<String> {
    (0..10)
        .map(|i| {
            card(
                &format!("/v2/record/p{page}-{i}"),
                Some(&format!("Book {page}-{i}")),
                Some((4.0, 100 + i)),
            )
        })
        .collect()
}
