//! taxwatch CLI: ingest DIAN concepts published on cijuf.org.co into a
//! local CSV store, with optional AI summaries, and query them.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
