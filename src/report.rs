use std::path::Path;

use anyhow::Context as _;

use crate::model::Book;
use crate::rank::{RankConfig, RankError};
use crate::store::LibraryStore;

/// Boxed ASCII table for the text report and the `stats` subcommand.
pub fn render_table(rows: &[Vec<String>]) -> String {
    if rows.is_empty() {
        return "No data".to_owned();
    }

    let columns = rows.iter().map(Vec::len).max().unwrap_or(0);
    let mut widths = vec![0usize; columns];
    for row in rows {
        for (i, value) in row.iter().enumerate() {
            widths[i] = widths[i].max(value.chars().count());
        }
    }

    let border = {
        let segments: Vec<String> = widths.iter().map(|w| "-".repeat(w + 2)).collect();
        format!("+{}+", segments.join("+"))
    };

    let mut lines = vec![border.clone()];
    for row in rows {
        let cells: Vec<String> = widths
            .iter()
            .copied()
            .enumerate()
            .map(|(i, width)| {
                let value = row.get(i).map(String::as_str).unwrap_or("");
                format!("{value:<width$}")
            })
            .collect();
        lines.push(format!("| {} |", cells.join(" | ")));
        lines.push(border.clone());
    }

    lines.join("\n")
}

/// All stored rows for the scope, as one table.
pub fn render_items(store: &LibraryStore, query: &str) -> anyhow::Result<String> {
    let rows: Vec<Vec<String>> = store.all_items(query)?.iter().map(book_row).collect();
    Ok(format!("ALL LIBRARY ITEMS\n{}\n", render_table(&rows)))
}

/// The statistics report: distributions, author rankings, and the rating
/// leaderboards. Weighted sections fall back to raw-rating ordering (with a
/// note) when the scope has too few rated items.
pub fn render_report(
    store: &LibraryStore,
    query: &str,
    limit: usize,
    config: RankConfig,
) -> anyhow::Result<String> {
    let mut out = format!("LIBRARY RESULTS: {query}\n");

    let formats: Vec<Vec<String>> = store
        .format_distribution(query)?
        .into_iter()
        .map(|(format, count)| vec![format, count.to_string()])
        .collect();
    out.push_str("\n\nFormat Distribution:\n");
    out.push_str(&render_table(&formats));

    let years: Vec<Vec<String>> = store
        .pub_year_distribution(query)?
        .into_iter()
        .map(|(year, count)| vec![year.to_string(), count.to_string()])
        .collect();
    out.push_str("\n\nPublication Year Distribution:\n");
    out.push_str(&render_table(&years));

    let frequent: Vec<Vec<String>> = store
        .top_authors_by_count(query, limit)?
        .into_iter()
        .map(|(author, count)| vec![author, count.to_string()])
        .collect();
    out.push_str("\n\nMost Frequent Authors:\n");
    out.push_str(&render_table(&frequent));

    let unweighted_authors: Vec<Vec<String>> = store
        .top_authors_unweighted(query, limit)?
        .into_iter()
        .map(|(author, avg)| vec![author, format!("{avg:.2}")])
        .collect();
    out.push_str("\n\nTop Rated Authors (Unweighted):\n");
    out.push_str(&render_table(&unweighted_authors));

    match store.top_authors_weighted(query, limit, config) {
        Ok(authors) => {
            let rows: Vec<Vec<String>> = authors
                .into_iter()
                .map(|score| {
                    vec![
                        score.author,
                        format!("{:.2}", score.weighted_count),
                        score.book_count.to_string(),
                    ]
                })
                .collect();
            out.push_str("\n\nTop Authors (Bayesian Weighted):\n");
            out.push_str(&render_table(&rows));
        }
        Err(err) if is_scope_too_small(&err) => {
            out.push_str("\n\nTop Authors (Bayesian Weighted):\n");
            out.push_str("Too few rated items for weighted ranking.");
        }
        Err(err) => return Err(err),
    }

    let raw: Vec<Vec<String>> = store
        .top_rated_books_raw(query, limit)?
        .iter()
        .map(|book| {
            vec![
                book.title.clone(),
                book.author.clone(),
                format!("{:.2}", book.rating.unwrap_or(0.0)),
            ]
        })
        .collect();
    out.push_str("\n\nTop Rated Books (Unweighted):\n");
    out.push_str(&render_table(&raw));

    match store.top_rated_books(query, limit, config) {
        Ok(ranked) => {
            let rows: Vec<Vec<String>> = ranked
                .iter()
                .map(|r| {
                    vec![
                        r.book.title.clone(),
                        r.book.author.clone(),
                        format!("{:.2}", r.weighted_rating),
                    ]
                })
                .collect();
            out.push_str("\n\nTop Rated Books (Bayesian Weighted):\n");
            out.push_str(&render_table(&rows));
        }
        Err(err) if is_scope_too_small(&err) => {
            out.push_str("\n\nTop Rated Books (Bayesian Weighted):\n");
            out.push_str("Too few rated items for weighted ranking; see the unweighted table.");
        }
        Err(err) => return Err(err),
    }

    out.push('\n');
    Ok(out)
}

/// Aggregates as one JSON document for `stats --json`.
pub fn stats_json(
    store: &LibraryStore,
    query: &str,
    limit: usize,
    config: RankConfig,
) -> anyhow::Result<serde_json::Value> {
    let weighted_books = match store.top_rated_books(query, limit, config) {
        Ok(ranked) => Some(
            ranked
                .iter()
                .map(|r| {
                    serde_json::json!({
                        "book": &r.book,
                        "weighted_rating": r.weighted_rating,
                    })
                })
                .collect::<Vec<_>>(),
        ),
        Err(err) if is_scope_too_small(&err) => None,
        Err(err) => return Err(err),
    };
    let weighted_authors = match store.top_authors_weighted(query, limit, config) {
        Ok(authors) => Some(
            authors
                .iter()
                .map(|score| {
                    serde_json::json!({
                        "author": &score.author,
                        "weighted_count": score.weighted_count,
                        "book_count": score.book_count,
                    })
                })
                .collect::<Vec<_>>(),
        ),
        Err(err) if is_scope_too_small(&err) => None,
        Err(err) => return Err(err),
    };

    Ok(serde_json::json!({
        "query": query,
        "item_count": store.item_count(query)?,
        "format_distribution": store
            .format_distribution(query)?
            .into_iter()
            .map(|(format, count)| serde_json::json!({ "format": format, "count": count }))
            .collect::<Vec<_>>(),
        "pub_year_distribution": store
            .pub_year_distribution(query)?
            .into_iter()
            .map(|(year, count)| serde_json::json!({ "year": year, "count": count }))
            .collect::<Vec<_>>(),
        "most_frequent_authors": store
            .top_authors_by_count(query, limit)?
            .into_iter()
            .map(|(author, count)| serde_json::json!({ "author": author, "count": count }))
            .collect::<Vec<_>>(),
        "top_authors_unweighted": store
            .top_authors_unweighted(query, limit)?
            .into_iter()
            .map(|(author, avg)| serde_json::json!({ "author": author, "avg_rating": avg }))
            .collect::<Vec<_>>(),
        "top_authors_weighted": weighted_authors,
        "top_rated_books_raw": store.top_rated_books_raw(query, limit)?,
        "top_rated_books_weighted": weighted_books,
    }))
}

/// All stored rows as CSV, one line per book with a header.
pub fn items_csv(store: &LibraryStore, query: &str) -> anyhow::Result<String> {
    let mut out = String::from("link,title,author,format,pub_year,rating,num_ratings\n");
    for book in store.all_items(query)? {
        let fields = [
            book.link.clone(),
            book.title.clone(),
            book.author.clone(),
            book.format.clone(),
            book.pub_year.map(|y| y.to_string()).unwrap_or_default(),
            book.rating.map(|r| r.to_string()).unwrap_or_default(),
            book.num_ratings.to_string(),
        ];
        let escaped: Vec<String> = fields.iter().map(|f| csv_field(f)).collect();
        out.push_str(&escaped.join(","));
        out.push('\n');
    }
    Ok(out)
}

fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_owned()
    }
}

/// Write the three export artifacts into `out_dir`:
/// `library_items.txt`, `library_results.txt`, and `library_items.csv`.
pub fn write_artifacts(
    store: &LibraryStore,
    query: &str,
    out_dir: &Path,
    limit: usize,
    config: RankConfig,
) -> anyhow::Result<()> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("create export dir: {}", out_dir.display()))?;

    let items_path = out_dir.join("library_items.txt");
    std::fs::write(&items_path, render_items(store, query)?)
        .with_context(|| format!("write {}", items_path.display()))?;

    let results_path = out_dir.join("library_results.txt");
    std::fs::write(&results_path, render_report(store, query, limit, config)?)
        .with_context(|| format!("write {}", results_path.display()))?;

    let csv_path = out_dir.join("library_items.csv");
    std::fs::write(&csv_path, items_csv(store, query)?)
        .with_context(|| format!("write {}", csv_path.display()))?;

    Ok(())
}

/// Entry point for the `stats` subcommand.
pub fn stats(args: crate::cli::StatsArgs) -> anyhow::Result<()> {
    let store = LibraryStore::open(Path::new(&args.db)).context("open store")?;
    let config = RankConfig {
        min_votes_quantile: args.min_votes_quantile,
    };

    if args.json {
        let value = stats_json(&store, &args.query, args.limit, config)?;
        println!(
            "{}",
            serde_json::to_string_pretty(&value).context("serialize stats json")?
        );
    } else {
        print!("{}", render_report(&store, &args.query, args.limit, config)?);
    }
    Ok(())
}

/// Entry point for the `export` subcommand.
pub fn export(args: crate::cli::ExportArgs) -> anyhow::Result<()> {
    let store = LibraryStore::open(Path::new(&args.db)).context("open store")?;
    let config = RankConfig {
        min_votes_quantile: args.min_votes_quantile,
    };
    let out_dir = Path::new(&args.out);

    write_artifacts(&store, &args.query, out_dir, args.limit, config)?;
    println!(
        "Wrote library_items.txt, library_results.txt, library_items.csv to {}",
        out_dir.display()
    );
    Ok(())
}

fn is_scope_too_small(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<RankError>(),
        Some(RankError::ScopeTooSmall { .. })
    )
}

fn book_row(book: &Book) -> Vec<String> {
    vec![
        book.title.clone(),
        book.author.clone(),
        book.format.clone(),
        book.pub_year.map(|y| y.to_string()).unwrap_or_default(),
        book.rating.map(|r| format!("{r:.2}")).unwrap_or_default(),
        book.num_ratings.to_string(),
        book.link.clone(),
    ]
}
