//! Stub zone2json service.
//!
//! Answers every request on the `zone2json` queue with a small JSON summary
//! of the zone it received, so the CLI can be exercised without the real
//! converter.
//!
//! Run with: cargo run --example stub_responder
//!
//! Requires: an AMQP broker (e.g. RabbitMQ) on localhost:5672, or set BROKER_URI.
//!
//! Then: cargo run -- path/to/zone.db

use bytes::Bytes;
use tracing_subscriber::EnvFilter;
use zone2json_rpc::{Responder, RpcError, TransportBuilder, DEFAULT_DESTINATION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .with_ansi(false)
        .with_line_number(true)
        .init();

    let broker_uri =
        std::env::var("BROKER_URI").unwrap_or_else(|_| "amqp://localhost:5672/%2f".to_string());

    let transport = TransportBuilder::new()
        .uri(&broker_uri)
        .node_id("zone2json-stub")
        .build()
        .await?;

    let task = Responder::new(transport.clone(), DEFAULT_DESTINATION)
        .serve(|zone: Bytes| async move {
            let text = String::from_utf8_lossy(&zone);
            let records = text
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with(';') && !l.starts_with('$'))
                .count();
            let summary = serde_json::json!({ "bytes": zone.len(), "records": records });
            Ok::<_, RpcError>(Bytes::from(serde_json::to_vec(&summary)?))
        })
        .await?;

    println!("stub zone2json responder listening on {broker_uri}, Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    println!("Received Ctrl+C, shutting down...");

    transport.close().await?;
    task.await?;

    Ok(())
}
