//! TenderFit CLI: scan bid listings, fetch tender documents, and evaluate
//! bids against a company profile.
//!
//! Every subcommand prints one JSON object on stdout. Logs and progress go
//! to stderr.

mod commands;

use std::process::ExitCode;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    match commands::run(cli).await {
        Ok(code) => Ok(code),
        Err(report) => {
            tracing::debug!(error = ?report, "command failed");
            commands::print_json(&commands::error_payload(&report));
            Ok(ExitCode::FAILURE)
        }
    }
}
