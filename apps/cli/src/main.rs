//! legisync CLI: fold scraped legislative data into a versioned output tree
//! and extract bill text from it.
//!
//! Logs go to stderr. The run summary JSON is the only thing on stdout.

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
