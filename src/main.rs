//! dbconn - Main entry point.
//!
//! Reports the connection manager status and verifies that a named connection
//! can be opened and can run a transaction.

use clap::Parser;
use dbconn::config::{Cli, Command};
use dbconn::db;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    // stdout carries the JSON report
    if cli.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> ExitCode {
    match serde_json::to_string_pretty(value) {
        Ok(json) => {
            println!("{}", json);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Failed to serialize report");
            ExitCode::FAILURE
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli);

    let manager = db::shared();
    if !manager.is_initialized().await {
        let message = manager.error().await.unwrap_or_default();
        error!(error = %message, "Invalid database configuration");
        eprintln!("Error: {}", message);
        return ExitCode::FAILURE;
    }

    match cli.command {
        Command::Stats => print_json(&manager.pool_stats().await),
        Command::Check { name } => {
            info!(
                connection = %name,
                "Checking database connection v{}",
                env!("CARGO_PKG_VERSION")
            );

            let adapter = match manager.get_connection(&name).await {
                Ok(adapter) => adapter,
                Err(e) => {
                    let message = manager.error().await.unwrap_or_else(|| e.to_string());
                    eprintln!("Error: {}", message);
                    if let Some(suggestion) = e.suggestion() {
                        eprintln!("Hint: {}", suggestion);
                    }
                    return ExitCode::FAILURE;
                }
            };

            let checked = match adapter.begin_transaction().await {
                Ok(()) => adapter.rollback().await,
                Err(e) => Err(e),
            };
            if let Err(e) = checked {
                eprintln!("Error: {}", e);
                manager.close_all().await;
                return ExitCode::FAILURE;
            }

            info!(connection = %name, "Connection check passed");
            let code = print_json(&manager.pool_stats().await);
            manager.close_all().await;
            code
        }
    }
}
