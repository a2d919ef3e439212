use std::path::Path;

use anyhow::Context as _;
use rusqlite::{Connection, OptionalExtension as _, params};

use crate::model::{self, Book};
use crate::rank::{self, RankConfig};

/// Durable store of Book rows, logically partitioned by the query string
/// that produced each row. `(query, link)` is the sole identity key; a later
/// scrape of the same link overwrites the row.
pub struct LibraryStore {
    conn: Connection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Updated,
}

/// A book with its query-time Bayesian weighted rating.
#[derive(Debug, Clone)]
pub struct RankedBook {
    pub book: Book,
    pub weighted_rating: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuthorScore {
    pub author: String,
    /// Sum of the Bayesian weighted ratings of the author's books; unrated
    /// books contribute exactly the scope mean.
    pub weighted_count: f64,
    pub book_count: u64,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS library_items (
    query       TEXT NOT NULL,
    link        TEXT NOT NULL,
    title       TEXT NOT NULL,
    author      TEXT NOT NULL,
    format      TEXT NOT NULL,
    pub_year    INTEGER,
    rating      REAL,
    num_ratings INTEGER NOT NULL DEFAULT 0,
    scraped_at  TEXT NOT NULL,
    PRIMARY KEY (query, link)
);
";

impl LibraryStore {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("open library database: {}", path.display()))?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        Self::with_connection(Connection::open_in_memory().context("open in-memory database")?)
    }

    fn with_connection(conn: Connection) -> anyhow::Result<Self> {
        conn.execute_batch(SCHEMA)
            .context("create library_items table")?;
        Ok(Self { conn })
    }

    /// Idempotent write keyed by `(query, link)`. An existing row is
    /// overwritten so fresher rating counts supersede stale ones.
    pub fn upsert(&self, query: &str, book: &Book) -> anyhow::Result<Upsert> {
        let exists: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM library_items WHERE query = ?1 AND link = ?2",
                params![query, book.link],
                |row| row.get(0),
            )
            .optional()
            .context("check for existing row")?;

        let scraped_at = chrono::Utc::now().to_rfc3339();
        match exists {
            Some(_) => {
                self.conn
                    .execute(
                        "UPDATE library_items
                         SET title = ?3, author = ?4, format = ?5, pub_year = ?6,
                             rating = ?7, num_ratings = ?8, scraped_at = ?9
                         WHERE query = ?1 AND link = ?2",
                        params![
                            query,
                            book.link,
                            book.title,
                            book.author,
                            book.format,
                            book.pub_year,
                            book.rating,
                            book.num_ratings,
                            scraped_at,
                        ],
                    )
                    .context("update library item")?;
                Ok(Upsert::Updated)
            }
            None => {
                self.conn
                    .execute(
                        "INSERT INTO library_items
                         (query, link, title, author, format, pub_year, rating, num_ratings, scraped_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                        params![
                            query,
                            book.link,
                            book.title,
                            book.author,
                            book.format,
                            book.pub_year,
                            book.rating,
                            book.num_ratings,
                            scraped_at,
                        ],
                    )
                    .context("insert library item")?;
                Ok(Upsert::Inserted)
            }
        }
    }

    pub fn item_count(&self, query: &str) -> anyhow::Result<u64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM library_items WHERE query = ?1",
                params![query],
                |row| row.get(0),
            )
            .context("count library items")
    }

    pub fn all_items(&self, query: &str) -> anyhow::Result<Vec<Book>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT link, title, author, format, pub_year, rating, num_ratings
                 FROM library_items WHERE query = ?1
                 ORDER BY title, link",
            )
            .context("prepare all-items query")?;
        let rows = stmt
            .query_map(params![query], book_from_row)
            .context("run all-items query")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("read all-items rows")
    }

    /// Format label -> row count; counts sum to the scope's row count.
    pub fn format_distribution(&self, query: &str) -> anyhow::Result<Vec<(String, u64)>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT format, COUNT(*) AS format_count
                 FROM library_items WHERE query = ?1
                 GROUP BY format
                 ORDER BY format_count DESC, format",
            )
            .context("prepare format distribution")?;
        let rows = stmt
            .query_map(params![query], |row| Ok((row.get(0)?, row.get(1)?)))
            .context("run format distribution")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("read format distribution")
    }

    /// Sparse publication-year histogram in ascending year order.
    pub fn pub_year_distribution(&self, query: &str) -> anyhow::Result<Vec<(i32, u64)>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT pub_year, COUNT(*) AS year_count
                 FROM library_items WHERE query = ?1 AND pub_year IS NOT NULL
                 GROUP BY pub_year
                 ORDER BY pub_year",
            )
            .context("prepare pub-year distribution")?;
        let rows = stmt
            .query_map(params![query], |row| Ok((row.get(0)?, row.get(1)?)))
            .context("run pub-year distribution")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("read pub-year distribution")
    }

    /// Most prolific authors by raw book count.
    pub fn top_authors_by_count(
        &self,
        query: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<(String, u64)>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT author, COUNT(*) AS author_count
                 FROM library_items WHERE query = ?1 AND author <> ?2
                 GROUP BY author
                 ORDER BY author_count DESC, author
                 LIMIT ?3",
            )
            .context("prepare author frequency")?;
        let rows = stmt
            .query_map(params![query, model::UNKNOWN_AUTHOR, limit as i64], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .context("run author frequency")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("read author frequency")
    }

    /// Authors ranked by the raw average rating of their rated books;
    /// unrated books do not enter the average.
    pub fn top_authors_unweighted(
        &self,
        query: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<(String, f64)>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT author, AVG(rating) AS avg_rating
                 FROM library_items
                 WHERE query = ?1 AND rating IS NOT NULL AND author <> ?2
                 GROUP BY author
                 ORDER BY avg_rating DESC, author
                 LIMIT ?3",
            )
            .context("prepare unweighted author ranking")?;
        let rows = stmt
            .query_map(params![query, model::UNKNOWN_AUTHOR, limit as i64], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .context("run unweighted author ranking")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("read unweighted author ranking")
    }

    /// Authors ranked by the sum of their books' Bayesian weighted ratings,
    /// so a highly rated prolific author outranks an equally prolific but
    /// low-rated one. Fails with `rank::RankError::ScopeTooSmall` (via
    /// downcast) when the scope has fewer than 2 rated rows.
    pub fn top_authors_weighted(
        &self,
        query: &str,
        limit: usize,
        config: RankConfig,
    ) -> anyhow::Result<Vec<AuthorScore>> {
        let stats = rank::scope_stats(&self.rated_pairs(query)?, config)?;

        let books = self.all_items(query)?;
        let mut by_author: Vec<AuthorScore> = Vec::new();
        for book in &books {
            if book.author == model::UNKNOWN_AUTHOR {
                continue;
            }
            let weighted = rank::bayesian_avg(
                book.rating.unwrap_or(stats.mean),
                book.num_ratings,
                stats.min_votes,
                stats.mean,
            );
            match by_author.iter_mut().find(|s| s.author == book.author) {
                Some(score) => {
                    score.weighted_count += weighted;
                    score.book_count += 1;
                }
                None => by_author.push(AuthorScore {
                    author: book.author.clone(),
                    weighted_count: weighted,
                    book_count: 1,
                }),
            }
        }

        by_author.sort_by(|a, b| {
            b.weighted_count
                .total_cmp(&a.weighted_count)
                .then(b.book_count.cmp(&a.book_count))
                .then(a.author.cmp(&b.author))
        });
        by_author.truncate(limit);
        Ok(by_author)
    }

    /// Books ranked by Bayesian weighted rating; ties broken by vote count
    /// descending, then title. Fails with `rank::RankError::ScopeTooSmall`
    /// (via downcast) when fewer than 2 rows in scope are rated.
    pub fn top_rated_books(
        &self,
        query: &str,
        limit: usize,
        config: RankConfig,
    ) -> anyhow::Result<Vec<RankedBook>> {
        let rated = self.rated_pairs(query)?;
        let stats = rank::scope_stats(&rated, config)?;

        let mut ranked: Vec<RankedBook> = self
            .all_items(query)?
            .into_iter()
            .filter_map(|book| {
                let rating = book.rating?;
                let weighted =
                    rank::bayesian_avg(rating, book.num_ratings, stats.min_votes, stats.mean);
                Some(RankedBook {
                    book,
                    weighted_rating: weighted,
                })
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.weighted_rating
                .total_cmp(&a.weighted_rating)
                .then(b.book.num_ratings.cmp(&a.book.num_ratings))
                .then(a.book.title.cmp(&b.book.title))
        });
        ranked.truncate(limit);
        Ok(ranked)
    }

    /// Raw-rating leaderboard, the fallback ordering when the scope is too
    /// small for the weighted ranking.
    pub fn top_rated_books_raw(&self, query: &str, limit: usize) -> anyhow::Result<Vec<Book>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT link, title, author, format, pub_year, rating, num_ratings
                 FROM library_items WHERE query = ?1 AND rating IS NOT NULL
                 ORDER BY rating DESC, num_ratings DESC, title
                 LIMIT ?2",
            )
            .context("prepare raw leaderboard")?;
        let rows = stmt
            .query_map(params![query, limit as i64], book_from_row)
            .context("run raw leaderboard")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("read raw leaderboard")
    }

    fn rated_pairs(&self, query: &str) -> anyhow::Result<Vec<(f64, u64)>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT rating, num_ratings FROM library_items
                 WHERE query = ?1 AND rating IS NOT NULL",
            )
            .context("prepare rated-rows query")?;
        let rows = stmt
            .query_map(params![query], |row| Ok((row.get(0)?, row.get(1)?)))
            .context("run rated-rows query")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("read rated rows")
    }
}

fn book_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Book> {
    Ok(Book {
        link: row.get(0)?,
        title: row.get(1)?,
        author: row.get(2)?,
        format: row.get(3)?,
        pub_year: row.get(4)?,
        rating: row.get(5)?,
        num_ratings: row.get(6)?,
    })
}
