//! # bayeux
//!
//! Command-line Bayeux client.
//!
//! ## Usage
//!
//! ```bash
//! # Print every message on /chat/* as a JSON line
//! bayeux subscribe /chat/*
//!
//! # Publish once and report the outcome
//! bayeux publish /chat/lobby '{"text": "hello"}'
//!
//! # Use a specific endpoint or config file
//! bayeux --endpoint https://push.example.com/bayeux subscribe /news
//! BAYEUX_ENDPOINT=http://localhost:8000/bayeux bayeux subscribe /news
//! ```

use anyhow::{Context, Result};
use bayeux_client::{Client, ClientConfig};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "bayeux", version, about = "Bayeux publish/subscribe client")]
struct Cli {
    /// Configuration file (defaults to the standard search path)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Server endpoint, overriding the configuration
    #[arg(short, long, global = true)]
    endpoint: Option<String>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Print messages received on channels until interrupted
    Subscribe {
        /// Channels or patterns
        #[arg(required = true)]
        channels: Vec<String>,
    },
    /// Publish a JSON value on a channel
    Publish {
        channel: String,
        /// JSON payload
        data: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bayeux=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ClientConfig::from_file(path)?,
        None => ClientConfig::load()?,
    };
    if let Some(endpoint) = cli.endpoint {
        config.endpoint = endpoint;
    }

    bayeux_client::metrics::init_metrics();
    let client = Client::builder(config).build()?;

    match cli.command {
        Cmd::Subscribe { channels } => subscribe(&client, channels).await?,
        Cmd::Publish { channel, data } => publish(&client, &channel, &data).await?,
    }

    client
        .disconnect()
        .wait()
        .await
        .context("Disconnect failed")?;
    Ok(())
}

async fn subscribe(client: &Client, channels: Vec<String>) -> Result<()> {
    let subscription = client.subscribe(channels, |channel, data| {
        let line = serde_json::json!({ "channel": channel, "data": data });
        println!("{line}");
    })?;

    subscription.wait().await.context("Subscribe failed")?;
    tracing::info!(channels = ?subscription.channels(), "Subscribed, press Ctrl+C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    subscription.cancel();
    Ok(())
}

async fn publish(client: &Client, channel: &str, data: &str) -> Result<()> {
    let data: serde_json::Value =
        serde_json::from_str(data).with_context(|| format!("Invalid JSON payload: {data}"))?;

    client
        .publish(channel, data)?
        .wait()
        .await
        .with_context(|| format!("Publish to {channel} failed"))?;

    tracing::info!(channel = %channel, "Published");
    Ok(())
}
