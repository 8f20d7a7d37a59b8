mod cli;
mod context;
mod engine;
mod errors;
mod logging;
mod model;
mod orchestrator;
#[cfg(feature = "tui")]
mod tui;

use anyhow::Result;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    cli::run(args).await
}
