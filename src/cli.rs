use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Scrape catalog search results for a query into the database.
    Scrape(ScrapeArgs),
    /// Print aggregate statistics for a previously scraped query.
    Stats(StatsArgs),
    /// Write the text/CSV report artifacts for a query.
    Export(ExportArgs),
}

#[derive(Debug, Args)]
pub struct ScrapeArgs {
    /// Search term to look up in the catalog.
    #[arg(long)]
    pub query: String,

    /// SQLite database path.
    #[arg(long, default_value = "library.db")]
    pub db: String,

    /// Catalog search endpoint.
    #[arg(long, default_value = "https://calgary.bibliocommons.com/v2/search")]
    pub base_url: String,

    /// Hard page ceiling per run.
    #[arg(long, default_value_t = 200)]
    pub max_pages: u32,

    /// Fetch attempts per page before the run aborts.
    #[arg(long, default_value_t = 3)]
    pub max_attempts: u32,

    /// First retry backoff in milliseconds; doubles per attempt.
    #[arg(long, default_value_t = 500)]
    pub backoff_ms: u64,

    /// How long to wait for a page to finish rendering.
    #[arg(long, default_value_t = 10_000)]
    pub readiness_timeout_ms: u64,

    /// Delay between readiness polls.
    #[arg(long, default_value_t = 250)]
    pub poll_interval_ms: u64,
}

#[derive(Debug, Args)]
pub struct StatsArgs {
    /// Query scope to report on.
    #[arg(long)]
    pub query: String,

    /// SQLite database path.
    #[arg(long, default_value = "library.db")]
    pub db: String,

    /// Rows per ranking table.
    #[arg(long, default_value_t = 10)]
    pub limit: usize,

    /// Quantile of the scope's vote counts used as the minimum-votes
    /// threshold in the Bayesian weighting.
    #[arg(long, default_value_t = 0.6)]
    pub min_votes_quantile: f64,

    /// Emit the aggregates as JSON instead of tables.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct ExportArgs {
    /// Query scope to export.
    #[arg(long)]
    pub query: String,

    /// SQLite database path.
    #[arg(long, default_value = "library.db")]
    pub db: String,

    /// Output directory for the report artifacts.
    #[arg(long)]
    pub out: String,

    /// Rows per ranking table.
    #[arg(long, default_value_t = 10)]
    pub limit: usize,

    /// Quantile of the scope's vote counts used as the minimum-votes
    /// threshold in the Bayesian weighting.
    #[arg(long, default_value_t = 0.6)]
    pub min_votes_quantile: f64,
}
