use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use signalk_client::{StreamSubscriber, DEFAULT_STREAM_URL};
use signalk_core::{PublisherOptions, VesselInfo};
use signalk_mqtt::{Session, SessionConfig, TracingStatus};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Publish the own vessel's SignalK data to an MQTT broker.
#[derive(Parser, Debug)]
#[command(name = "signalk-mqtt")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file: publisher options, or a plugin configuration
    /// file with the options under "configuration"
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory for the outgoing message store
    #[arg(long, default_value = "./data/signalk-to-mqtt")]
    data_dir: PathBuf,

    /// SignalK server stream endpoint
    #[arg(long, default_value = DEFAULT_STREAM_URL)]
    signalk_url: String,

    /// Vessel MMSI, preferred as identity
    #[arg(long)]
    mmsi: Option<String>,

    /// Vessel uuid, used when no MMSI is given
    #[arg(long)]
    uuid: Option<String>,

    /// Vessel name
    #[arg(long)]
    name: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,signalk_mqtt=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    tracing::info!("SignalK to MQTT publisher starting...");

    let options = match &args.config {
        Some(path) => PublisherOptions::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => {
            tracing::warn!("No configuration file given, using defaults");
            PublisherOptions::default()
        }
    };

    let config = SessionConfig {
        options,
        vessel: VesselInfo {
            name: args.name,
            mmsi: args.mmsi,
            uuid: args.uuid,
        },
        data_dir: args.data_dir,
    };

    let session = Session::start(
        config,
        Box::new(StreamSubscriber::new(args.signalk_url.clone())),
        Arc::new(TracingStatus::new()),
    )?;

    if !session.is_publishing() {
        tracing::info!("sendToRemote is disabled, nothing to do");
        return Ok(());
    }

    tracing::info!("Reading {}", args.signalk_url);
    tracing::info!("Publishing as {}", session.identity());

    tokio::signal::ctrl_c().await?;
    tracing::info!("Received Ctrl+C, shutting down...");

    let pending = session.stop().await;
    tracing::info!("Shutdown complete ({} messages kept)", pending);
    Ok(())
}
