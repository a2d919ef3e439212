use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    bibliostat::logging::init().context("init logging")?;

    let cli = bibliostat::cli::Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    match cli.command {
        bibliostat::cli::Command::Scrape(args) => {
            bibliostat::ingest::run(args).await.context("scrape")?;
        }
        bibliostat::cli::Command::Stats(args) => {
            bibliostat::report::stats(args).context("stats")?;
        }
        bibliostat::cli::Command::Export(args) => {
            bibliostat::report::export(args).context("export")?;
        }
    }

    Ok(())
}
