//! Doorlist CLI - Database migrations and management tools.
//!
//! # Usage
//!
//! ```bash
//! # Run dispatcher database migrations
//! dl-cli migrate
//!
//! # Seed development data (purchasers, payments, tickets)
//! dl-cli seed
//! ```
//!
//! # Commands
//!
//! - `migrate` - Run database migrations
//! - `seed` - Seed database with development data

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "dl-cli")]
#[command(author, version, about = "Doorlist CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run dispatcher database migrations
    Migrate,
    /// Seed the database with development data
    Seed,
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Migrate => commands::migrate::dispatch().await?,
        Commands::Seed => commands::seed::ticketing().await?,
    }
    Ok(())
}
