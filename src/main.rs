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
    imgharvest::logging::init().context("init logging")?;

    let cli = imgharvest::cli::Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    match cli.command {
        imgharvest::cli::Command::Run(args) => {
            imgharvest::harvest::run(args).await.context("run")?;
        }
        imgharvest::cli::Command::Check(args) => {
            imgharvest::check::run(args).await.context("check")?;
        }
        imgharvest::cli::Command::Links(args) => {
            imgharvest::links::run(args).context("links")?;
        }
    }

    Ok(())
}
