//! Blackscope CLI - Main Entry Point
//!
//! Terminal client for the Blackscope evaluation server: submits a URL for
//! assessment and renders the streamed results live.

use clap::{Parser, Subcommand};

use blackscope_cli::client::{ClientError, QaClient};
use blackscope_cli::output;

/// Blackscope CLI - streaming website Q/A assessment
#[derive(Parser)]
#[command(name = "blackscope")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Server address
    #[arg(long, default_value = "http://127.0.0.1:8000", global = true)]
    server: String,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a URL, streaming progress as it happens
    Qa {
        /// Target URL (scheme optional, defaults to https)
        url: String,
    },

    /// Check server health
    Health,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let client = QaClient::new(&cli.server)?;

    match cli.command {
        Commands::Qa { url } => {
            let result = client
                .stream_qa(&url, |message, _view| output::print_message(message))
                .await;
            match result {
                Ok(view) => output::print_summary(&view),
                Err(ClientError::UnexpectedEnd) => {
                    anyhow::bail!("stream ended unexpectedly before the run completed");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Commands::Health => {
            println!("{}", client.health().await?);
        }
    }
    Ok(())
}
