//! zone2json-rpc - send a DNS zone file to the zone2json service and print
//! the reply.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use zone2json_rpc::{ClientBuilder, TransportBuilder, DEFAULT_DESTINATION};

#[derive(Parser, Debug)]
#[command(name = "zone2json-rpc")]
#[command(version)]
#[command(about = "Send a DNS zone file to the zone2json service over AMQP and print the reply")]
struct Cli {
    /// Path to a file containing DNS zone text
    #[arg(value_name = "ZONE_FILE")]
    zone_file: PathBuf,

    /// Broker URI
    #[arg(long, env = "BROKER_URI", default_value = "amqp://localhost:5672/%2f")]
    broker_uri: String,

    /// Queue the zone2json service consumes
    #[arg(long, default_value = DEFAULT_DESTINATION)]
    queue: String,

    /// Give up after this many seconds without a reply (default: wait forever)
    #[arg(long, value_name = "SECS")]
    timeout_secs: Option<u64>,

    /// Re-indent a JSON reply
    #[arg(long)]
    pretty: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    let cli = Cli::parse();

    // stdout carries only the reply
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();

    let zone = std::fs::read_to_string(&cli.zone_file)
        .with_context(|| format!("failed to read zone file {}", cli.zone_file.display()))?;

    info!(
        "sending {} ({} bytes) to {}",
        cli.zone_file.display(),
        zone.len(),
        cli.queue
    );

    let reply = run(&cli, &zone).await?;

    if cli.pretty {
        println!("{}", pretty_json(&reply)?);
    } else {
        println!("{reply}");
    }

    Ok(())
}

/// Acquire the client, make the call, and release the client whatever the
/// call's outcome.
async fn run(cli: &Cli, zone: &str) -> Result<String> {
    // ---
    let transport = TransportBuilder::new()
        .uri(&cli.broker_uri)
        .node_id(format!("zone2json-rpc-{}", std::process::id()))
        .build()
        .await
        .with_context(|| format!("failed to connect to {}", cli.broker_uri))?;

    let mut builder = ClientBuilder::new(transport).destination(&cli.queue);
    if let Some(secs) = cli.timeout_secs {
        builder = builder.request_timeout(Duration::from_secs(secs));
    }

    let mut client = builder.build().await.context("failed to start client")?;
    debug!("reply queue: {}", client.reply_address());

    let reply = client.call_text(zone).await;
    let closed = client.close().await;

    settle(reply, closed, &cli.queue)
}

/// Combine the call outcome with the close outcome. The call's own error
/// always wins; a failed close only matters after a successful call.
fn settle(
    reply: zone2json_rpc::Result<String>,
    closed: zone2json_rpc::Result<()>,
    queue: &str,
) -> Result<String> {
    // ---
    match (reply, closed) {
        (Ok(reply), Ok(())) => Ok(reply),
        (Ok(_), Err(e)) => Err(e).context("failed to close broker connection"),
        (Err(e), closed) => {
            if let Err(close_err) = closed {
                warn!("failed to close broker connection: {close_err}");
            }
            Err(e).with_context(|| format!("request to {queue} failed"))
        }
    }
}

fn pretty_json(reply: &str) -> Result<String> {
    // ---
    let value: serde_json::Value =
        serde_json::from_str(reply).context("reply is not valid JSON")?;
    Ok(serde_json::to_string_pretty(&value)?)
}
