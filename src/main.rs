#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::module_name_repetitions,
    clippy::uninlined_format_args
)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use larkrelay::config::Config;
use larkrelay::gateway;
use larkrelay::relay::Relay;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "larkrelay")]
#[command(version)]
#[command(about = "Streams chat completions into Lark/Feishu chats.", long_about = None)]
struct Cli {
    /// Config file (default: $LARKRELAY_CONFIG or the platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the event callback gateway
    #[command(long_about = "\
Start the event callback gateway.

Receives Lark/Feishu event callbacks and answers messages addressed to \
the bot by streaming a completion into a single live-edited card. Bind \
address defaults to the values in your config file (gateway.host / gateway.port).

Examples:
  larkrelay gateway                  # use config defaults
  larkrelay gateway -p 8080          # listen on port 8080
  larkrelay gateway --host 0.0.0.0   # bind to all interfaces")]
    Gateway {
        /// Port to listen on (use 0 for random available port); defaults to config gateway.port
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to; defaults to config gateway.host
        #[arg(long)]
        host: Option<String>,
    },

    /// Send one message to the completion backend and print the answer
    Ask {
        /// Message text
        message: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging - respects RUST_LOG env var, defaults to INFO
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;

    let config = Config::load(cli.config.as_deref()).await?;

    match cli.command {
        Commands::Gateway { port, host } => {
            config.validate()?;
            let port = port.unwrap_or(config.gateway.port);
            let host = host.unwrap_or_else(|| config.gateway.host.clone());
            if port == 0 {
                info!("Starting larkrelay gateway on {host} (random port)");
            } else {
                info!("Starting larkrelay gateway on {host}:{port}");
            }
            gateway::run_gateway(&host, port, config).await
        }

        Commands::Ask { message } => {
            config.validate_completion()?;
            let relay = Relay::from_config(&config);
            let answer = relay.ask(&message).await?;
            println!("{answer}");
            Ok(())
        }
    }
}
