use anyhow::Context as _;
use scraper::{ElementRef, Html, Selector};

use crate::model::Book;

/// What one record-level warning means for the run summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningKind {
    /// A field was present but unparsable and fell back to its default.
    ParseDegraded,
    /// The candidate was skipped (no title or no link).
    RecordDiscarded,
}

#[derive(Debug, Clone)]
pub struct Warning {
    pub kind: WarningKind,
    pub detail: String,
}

#[derive(Debug, Default)]
pub struct Extraction {
    pub books: Vec<Book>,
    pub warnings: Vec<Warning>,
}

/// Page-level classification used by the fetcher's readiness polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageProbe {
    /// Result content is present (possibly zero cards past the last page).
    Ready,
    /// The catalog explicitly reported zero results for the query.
    NoResults,
    /// An anti-automation interstitial is standing in for the page.
    Blocked,
    /// Neither results nor a verdict yet; the page has not rendered.
    Pending,
}

struct Selectors {
    card: Selector,
    title: Selector,
    subtitle: Selector,
    author: Selector,
    display_info: Selector,
    rating: Selector,
    rating_count: Selector,
    link: Selector,
}

impl Selectors {
    fn new() -> anyhow::Result<Self> {
        Ok(Self {
            card: parse_selector("div.cp-search-result-item-content")?,
            title: parse_selector("span.title-content")?,
            subtitle: parse_selector("span.cp-subtitle")?,
            author: parse_selector("a.author-link")?,
            display_info: parse_selector("span.display-info-primary")?,
            rating: parse_selector("span.cp-rating-stars span")?,
            rating_count: parse_selector("span.rating-count")?,
            link: parse_selector("h2.cp-title a")?,
        })
    }
}

fn parse_selector(css: &str) -> anyhow::Result<Selector> {
    Selector::parse(css).map_err(|err| anyhow::anyhow!("parse css selector `{css}`: {err}"))
}

/// Extract every Book candidate from one result page. Missing fields degrade
/// to their defaults; only a candidate with no title or no link is dropped.
pub fn extract(html: &str) -> anyhow::Result<Extraction> {
    let selectors = Selectors::new().context("build extraction selectors")?;
    let document = Html::parse_document(html);

    let mut extraction = Extraction::default();
    for card in document.select(&selectors.card) {
        extract_card(&selectors, card, &mut extraction);
    }

    Ok(extraction)
}

fn extract_card(selectors: &Selectors, card: ElementRef<'_>, out: &mut Extraction) {
    let title = match element_text(card, &selectors.title) {
        Some(title) => title,
        None => {
            out.warnings.push(Warning {
                kind: WarningKind::RecordDiscarded,
                detail: "candidate without title".to_owned(),
            });
            return;
        }
    };

    let link = card
        .select(&selectors.link)
        .next()
        .and_then(|a| a.value().attr("href"))
        .map(str::to_owned);
    let Some(link) = link else {
        out.warnings.push(Warning {
            kind: WarningKind::RecordDiscarded,
            detail: format!("candidate without catalog link: {title}"),
        });
        return;
    };

    let mut book = Book::new(link, title);

    if let Some(subtitle) = element_text(card, &selectors.subtitle) {
        book.title = format!("{}: {subtitle}", book.title);
    }

    if let Some(author) = element_text(card, &selectors.author) {
        book.author = normalize_author(&author);
    }

    if let Some(display_info) = element_text(card, &selectors.display_info) {
        let mut parts = display_info.splitn(2, ", ");
        if let Some(format) = parts.next() {
            let format = format.trim();
            if !format.is_empty() {
                book.format = format.to_owned();
            }
        }
        if let Some(year_text) = parts.next() {
            match parse_pub_year(year_text) {
                Some(year) => book.pub_year = Some(year),
                None => out.warnings.push(Warning {
                    kind: WarningKind::ParseDegraded,
                    detail: format!("unparsable publication year `{year_text}` for {}", book.link),
                }),
            }
        }
    }

    if let Some(rating_text) = element_text(card, &selectors.rating) {
        match parse_rating(&rating_text) {
            Some(rating) => {
                book.rating = Some(rating);
                if let Some(count_text) = element_text(card, &selectors.rating_count) {
                    match parse_rating_count(&count_text) {
                        Some(count) => book.num_ratings = count,
                        None => out.warnings.push(Warning {
                            kind: WarningKind::ParseDegraded,
                            detail: format!(
                                "unparsable rating count `{count_text}` for {}",
                                book.link
                            ),
                        }),
                    }
                }
            }
            None => out.warnings.push(Warning {
                kind: WarningKind::ParseDegraded,
                detail: format!("unparsable rating `{rating_text}` for {}", book.link),
            }),
        }
    }

    out.books.push(book);
}

fn element_text(card: ElementRef<'_>, selector: &Selector) -> Option<String> {
    let element = card.select(selector).next()?;
    let text = element.text().collect::<String>();
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    Some(text.to_owned())
}

/// Catalog author strings come as `Last, First M.`; collapse the spacing
/// quirks (`Le Guin` -> `LeGuin`, `J. R. R.` -> `J.R.R.`) the way the
/// catalog's own author pages do.
fn normalize_author(raw: &str) -> String {
    let Some((last, first)) = raw.split_once(',') else {
        return raw.trim().to_owned();
    };

    let last: String = last.chars().filter(|c| !c.is_whitespace()).collect();

    let mut first_out = String::new();
    let mut after_dot = false;
    for ch in first.trim().chars() {
        if after_dot && ch.is_whitespace() {
            continue;
        }
        after_dot = ch == '.';
        first_out.push(ch);
    }

    format!("{last}, {first_out}")
}

fn parse_pub_year(text: &str) -> Option<i32> {
    let year: i32 = text.trim().parse().ok()?;
    if year < 1000 {
        return None;
    }
    Some(year)
}

/// Rating labels read like `Rated 4.5 out of 5 stars`; take the first token
/// that parses as a float and reject anything outside the 0..=5 scale.
fn parse_rating(text: &str) -> Option<f64> {
    let rating = text
        .split_whitespace()
        .find_map(|token| token.parse::<f64>().ok())?;
    if !(0.0..=5.0).contains(&rating) {
        return None;
    }
    Some(rating)
}

/// Rating counts read like `(1,234 ratings)`.
fn parse_rating_count(text: &str) -> Option<u64> {
    text.split_whitespace()
        .map(|token| token.trim_matches(|c| c == '(' || c == ')'))
        .find_map(|token| token.replace(',', "").parse::<u64>().ok())
}

/// Total result count advertised by the pagination label, e.g.
/// `1 to 10 of 3,027 results`.
pub fn advertised_total(html: &str) -> Option<u64> {
    let selector = Selector::parse("span.cp-pagination-label").ok()?;
    let document = Html::parse_document(html);
    let label = document.select(&selector).next()?;
    let text = label.text().collect::<String>();

    let mut tokens = text.split_whitespace();
    while let Some(token) = tokens.next() {
        if token == "of" {
            return tokens.next()?.replace(',', "").parse().ok();
        }
    }
    None
}

/// Classify a fetched body for the readiness loop in the fetcher.
///
/// Result content wins: the interstitial phrases are only consulted on a
/// page with no cards, no verdict, and no pagination label, so a card whose
/// own text reads like one (a book titled "Access Denied") stays `Ready`.
pub fn probe(html: &str) -> PageProbe {
    let document = Html::parse_document(html);
    if has_match(&document, "div.cp-search-result-item-content") {
        return PageProbe::Ready;
    }
    if has_match(&document, "div.cp-search-results-no-results") {
        return PageProbe::NoResults;
    }
    // A pagination label without cards is a real page past the end of the
    // result set, which the controller uses as its stopping sentinel.
    if has_match(&document, "span.cp-pagination-label") {
        return PageProbe::Ready;
    }

    let lowered = html.to_ascii_lowercase();
    if lowered.contains("captcha")
        || lowered.contains("unusual traffic")
        || lowered.contains("access denied")
    {
        return PageProbe::Blocked;
    }
    if lowered.contains("no results found") {
        return PageProbe::NoResults;
    }

    PageProbe::Pending
}

fn has_match(document: &Html, css: &str) -> bool {
    let Ok(selector) = Selector::parse(css) else {
        return false;
    };
    document.select(&selector).next().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(inner: &str) -> String {
        format!(r#"<div class="cp-search-result-item-content">{inner}</div>"#)
    }

    fn full_card() -> String {
        card(concat!(
            r#"<h2 class="cp-title"><a href="/v2/record/S1">x</a></h2>"#,
            r#"<span class="title-content">The Hobbit</span>"#,
            r#"<span class="cp-subtitle">There and Back Again</span>"#,
            r#"<a class="author-link">Tolkien, J. R. R.</a>"#,
            r#"<span class="display-info-primary">BOOK, 1937</span>"#,
            r#"<span class="cp-rating-stars rating-stars"><span>Rated 4.25 out of 5</span></span>"#,
            r#"<span class="rating-count">(2,150 ratings)</span>"#,
        ))
    }

    #[test]
    fn extracts_every_field_from_a_complete_card() -> anyhow::Result<()> {
        let extraction = extract(&full_card())?;

        assert!(extraction.warnings.is_empty());
        assert_eq!(extraction.books.len(), 1);

        let book = &extraction.books[0];
        assert_eq!(book.link, "/v2/record/S1");
        assert_eq!(book.title, "The Hobbit: There and Back Again");
        assert_eq!(book.author, "Tolkien, J.R.R.");
        assert_eq!(book.format, "BOOK");
        assert_eq!(book.pub_year, Some(1937));
        assert_eq!(book.rating, Some(4.25));
        assert_eq!(book.num_ratings, 2150);
        Ok(())
    }

    #[test]
    fn missing_optional_fields_degrade_to_defaults_without_warnings() -> anyhow::Result<()> {
        let html = card(concat!(
            r#"<h2 class="cp-title"><a href="/v2/record/S2">x</a></h2>"#,
            r#"<span class="title-content">Anonymous Work</span>"#,
        ));
        let extraction = extract(&html)?;

        assert!(extraction.warnings.is_empty());
        let book = &extraction.books[0];
        assert_eq!(book.author, "Unknown");
        assert_eq!(book.format, "Unknown");
        assert_eq!(book.pub_year, None);
        assert_eq!(book.rating, None);
        assert_eq!(book.num_ratings, 0);
        Ok(())
    }

    #[test]
    fn missing_title_discards_only_that_record() -> anyhow::Result<()> {
        let html = format!(
            "{}{}",
            card(r#"<h2 class="cp-title"><a href="/v2/record/S3">x</a></h2>"#),
            full_card()
        );
        let extraction = extract(&html)?;

        assert_eq!(extraction.books.len(), 1);
        assert_eq!(extraction.warnings.len(), 1);
        assert_eq!(extraction.warnings[0].kind, WarningKind::RecordDiscarded);
        Ok(())
    }

    #[test]
    fn unparsable_numbers_degrade_with_warnings() -> anyhow::Result<()> {
        let html = card(concat!(
            r#"<h2 class="cp-title"><a href="/v2/record/S4">x</a></h2>"#,
            r#"<span class="title-content">Odd Metadata</span>"#,
            r#"<span class="display-info-primary">BOOK, forthcoming</span>"#,
            r#"<span class="cp-rating-stars rating-stars"><span>Rated 9.5 out of 5</span></span>"#,
        ));
        let extraction = extract(&html)?;

        let book = &extraction.books[0];
        assert_eq!(book.format, "BOOK");
        assert_eq!(book.pub_year, None);
        assert_eq!(book.rating, None);
        assert_eq!(extraction.warnings.len(), 2);
        assert!(
            extraction
                .warnings
                .iter()
                .all(|w| w.kind == WarningKind::ParseDegraded)
        );
        Ok(())
    }

    #[test]
    fn pre_gutenberg_years_are_dropped() -> anyhow::Result<()> {
        let html = card(concat!(
            r#"<h2 class="cp-title"><a href="/v2/record/S5">x</a></h2>"#,
            r#"<span class="title-content">Scroll</span>"#,
            r#"<span class="display-info-primary">BOOK, 998</span>"#,
        ));
        let extraction = extract(&html)?;
        assert_eq!(extraction.books[0].pub_year, None);
        Ok(())
    }

    #[test]
    fn advertised_total_reads_pagination_label() {
        let html = r#"<span class="cp-pagination-label">1 to 10 of 3,027 results</span>"#;
        assert_eq!(advertised_total(html), Some(3027));
        assert_eq!(advertised_total("<p>nothing</p>"), None);
    }

    #[test]
    fn probe_classifies_page_states() {
        assert_eq!(probe(&full_card()), PageProbe::Ready);
        assert_eq!(
            probe(r#"<div class="cp-search-results-no-results">No results found</div>"#),
            PageProbe::NoResults
        );
        assert_eq!(
            probe(r#"<span class="cp-pagination-label">41 to 41 of 41 results</span>"#),
            PageProbe::Ready
        );
        assert_eq!(
            probe("<p>Please complete the CAPTCHA</p>"),
            PageProbe::Blocked
        );
        assert_eq!(probe("<div id=\"app\"></div>"), PageProbe::Pending);
    }

    #[test]
    fn suspicious_titles_inside_result_cards_are_not_interstitials() -> anyhow::Result<()> {
        let html = card(concat!(
            r#"<h2 class="cp-title"><a href="/v2/record/S6">x</a></h2>"#,
            r#"<span class="title-content">Access Denied</span>"#,
        ));
        assert_eq!(probe(&html), PageProbe::Ready);

        let labelled = format!(
            r#"<span class="cp-pagination-label">1 to 1 of 1 results</span>{html}"#
        );
        assert_eq!(probe(&labelled), PageProbe::Ready);

        // The record itself is still extracted.
        let extraction = extract(&html)?;
        assert_eq!(extraction.books[0].title, "Access Denied");
        Ok(())
    }

    #[test]
    fn author_normalization_matches_catalog_style() {
        assert_eq!(normalize_author("Tolkien, J. R. R."), "Tolkien, J.R.R.");
        assert_eq!(normalize_author("Le Guin, Ursula K."), "LeGuin, Ursula K.");
        assert_eq!(normalize_author("Homer"), "Homer");
    }
}
