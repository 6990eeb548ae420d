//! End-to-end request/reply through the in-process broker.
//!
//! Run with: cargo run --example zone_memory

use bytes::Bytes;
use zone2json_rpc::{ClientBuilder, Responder, Result, TransportBuilder, DEFAULT_DESTINATION};

const ZONE: &str = "\
$ORIGIN example.com.
$TTL 3600
@   IN SOA ns1 hostmaster 1 7200 3600 1209600 3600
@   IN NS  ns1
ns1 IN A   192.0.2.53
www IN A   192.0.2.80
";

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    tracing_subscriber::fmt::init();

    let server_transport = TransportBuilder::new()
        .uri("memory://")
        .node_id("zone2json-stub")
        .build()
        .await?;

    let _server = Responder::new(server_transport.clone(), DEFAULT_DESTINATION)
        .serve(|zone: Bytes| async move {
            let lines = zone.split(|b| *b == b'\n').filter(|l| !l.is_empty()).count();
            Ok(Bytes::from(format!("{{\"lines\":{lines}}}")))
        })
        .await?;

    let client_transport = TransportBuilder::new()
        .uri("memory://")
        .node_id("zone2json-client")
        .build()
        .await?;

    let mut client = ClientBuilder::new(client_transport).build().await?;

    let reply = client.call_text(ZONE).await?;
    println!("{reply}");

    client.close().await?;
    server_transport.close().await?;
    Ok(())
}
