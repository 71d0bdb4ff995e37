//! regindex CLI: local indexing of bulk regulatory title documents.
//!
//! Imports `title-<N>.xml` files, flattens them into hierarchical structures,
//! and maintains word and section metrics in a local libSQL database.

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
