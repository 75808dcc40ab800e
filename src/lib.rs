pub mod api;
pub mod auth;
pub mod chat;
pub mod cli;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod notes;
pub mod registry;
pub mod store;
pub mod upload;

use clap::Parser;

/// Parse arguments and run one command.
pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    cli::execute(cli::Cli::parse()).await
}
