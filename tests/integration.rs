use bytes::Bytes;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use zone2json_rpc::{
    //
    create_memory_transport_with_hub,
    Address,
    ClientBuilder,
    CorrelatedRequestClient,
    Envelope,
    MemoryHub,
    Responder,
    Result,
    RpcError,
    Subscription,
    TransportConfig,
    TransportPtr,
    DEFAULT_DESTINATION,
};

const SAMPLE_ZONE: &str = "$ORIGIN example.com.\n@ 3600 IN A 192.0.2.1\n";

async fn transport(hub: &Arc<MemoryHub>, node_id: &str) -> Result<TransportPtr> {
    // ---
    let config = TransportConfig {
        uri: "memory://".into(),
        node_id: node_id.into(),
        transport_type: None,
    };
    create_memory_transport_with_hub(config, hub.clone()).await
}

async fn client(hub: &Arc<MemoryHub>, node_id: &str) -> Result<CorrelatedRequestClient> {
    // ---
    ClientBuilder::new(transport(hub, node_id).await?).build().await
}

/// Stub for the zone2json service: answers every request with `"OK"`.
async fn ok_responder(hub: &Arc<MemoryHub>) -> Result<JoinHandle<()>> {
    // ---
    let transport = transport(hub, "stub").await?;
    Responder::new(transport, DEFAULT_DESTINATION)
        .serve(|_zone: Bytes| async move { Ok(Bytes::from_static(b"OK")) })
        .await
}

/// Raw responder that replies with the request's own correlation id as the
/// body, after first sending `decoys` replies with foreign correlation ids.
async fn echo_id_responder(
    hub: &Arc<MemoryHub>,
    decoys: usize,
) -> Result<(JoinHandle<()>, Arc<AtomicU32>)> {
    // ---
    let transport = transport(hub, "echo").await?;
    let mut handle = transport
        .subscribe(Subscription::from(DEFAULT_DESTINATION))
        .await?;
    let seen = Arc::new(AtomicU32::new(0));
    let counter = seen.clone();

    let task = tokio::spawn(async move {
        while let Some(request) = handle.inbox.recv().await {
            counter.fetch_add(1, Ordering::SeqCst);

            let reply_to = request.reply_to.clone().expect("request without reply_to");
            let correlation_id = request.correlation_id.clone().expect("request without id");

            for n in 0..decoys {
                let decoy = Envelope::response(
                    reply_to.clone(),
                    Bytes::from(format!("decoy-{n}")),
                    Arc::from(format!("not-{correlation_id}-{n}")),
                    Arc::from("text/plain"),
                );
                transport.publish(decoy).await.expect("decoy publish failed");
            }

            let reply = Envelope::response(
                reply_to,
                Bytes::from(correlation_id.to_string()),
                correlation_id,
                Arc::from("text/plain"),
            );
            transport.publish(reply).await.expect("reply publish failed");
        }
    });

    Ok((task, seen))
}

#[tokio::test]
async fn test_stub_responder_returns_ok() -> Result<()> {
    // ---
    let hub = MemoryHub::new();
    let _stub = ok_responder(&hub).await?;
    let mut client = client(&hub, "client").await?;

    let reply = client.call("zone text").await?;
    assert_eq!(reply, Bytes::from_static(b"OK"));

    client.close().await
}

#[tokio::test]
async fn test_call_text_sends_zone_and_decodes_reply() -> Result<()> {
    // ---
    let hub = MemoryHub::new();
    let stub_transport = transport(&hub, "stub").await?;
    let _stub = Responder::new(stub_transport, DEFAULT_DESTINATION)
        .serve(|zone: Bytes| async move {
            let body = format!("{{\"bytes\":{}}}", zone.len());
            Ok(Bytes::from(body))
        })
        .await?;

    let mut client = client(&hub, "client").await?;
    let reply = client.call_text(SAMPLE_ZONE).await?;

    assert_eq!(reply, format!("{{\"bytes\":{}}}", SAMPLE_ZONE.len()));
    client.close().await
}

#[tokio::test]
async fn test_request_carries_metadata() -> Result<()> {
    // ---
    let hub = MemoryHub::new();
    let spy = transport(&hub, "spy").await?;
    let mut requests = spy.subscribe(Subscription::from(DEFAULT_DESTINATION)).await?;

    let mut client = ClientBuilder::new(transport(&hub, "client").await?)
        .request_timeout(Duration::from_millis(50))
        .build()
        .await?;
    let reply_to = client.reply_address().clone();

    // Nobody answers; only the published request is of interest.
    let result = client.call(SAMPLE_ZONE).await;
    assert!(matches!(result, Err(RpcError::Timeout)));

    let request = requests.inbox.recv().await.expect("request not published");
    assert_eq!(request.address, Address::from(DEFAULT_DESTINATION));
    assert_eq!(request.payload, Bytes::from_static(SAMPLE_ZONE.as_bytes()));
    assert_eq!(request.reply_to, Some(reply_to));
    assert_eq!(request.content_type.as_deref(), Some("text/dns"));
    assert_eq!(request.correlation_id.as_deref().map(str::len), Some(36));
    Ok(())
}

#[tokio::test]
async fn test_non_matching_replies_are_ignored() -> Result<()> {
    // ---
    let hub = MemoryHub::new();
    let (_echo, _seen) = echo_id_responder(&hub, 3).await?;
    let mut client = client(&hub, "client").await?;

    // Three foreign replies arrive first; the wait continues past them.
    let reply = client.call(SAMPLE_ZONE).await?;
    let reply = String::from_utf8(reply.to_vec()).unwrap();

    assert!(!reply.starts_with("decoy-"), "got a decoy: {reply}");
    assert_eq!(reply.len(), 36);
    client.close().await
}

#[tokio::test]
async fn test_sequential_calls_use_fresh_tokens() -> Result<()> {
    // ---
    let hub = MemoryHub::new();
    let (_echo, seen) = echo_id_responder(&hub, 1).await?;
    let mut client = client(&hub, "client").await?;

    let first = client.call("first zone").await?;
    let second = client.call("second zone").await?;

    assert_ne!(first, second, "correlation token reused");
    assert_eq!(seen.load(Ordering::SeqCst), 2);
    client.close().await
}

#[tokio::test]
async fn test_unsolicited_reply_does_not_complete_call() -> Result<()> {
    // ---
    let hub = MemoryHub::new();
    let mut client = client(&hub, "client").await?;
    let intruder = transport(&hub, "intruder").await?;

    intruder
        .publish(Envelope::response(
            client.reply_address().clone(),
            Bytes::from_static(b"not yours"),
            Arc::from("foreign-correlation-id"),
            Arc::from("text/plain"),
        ))
        .await?;

    let outcome = tokio::time::timeout(Duration::from_millis(200), client.call("zone")).await;
    assert!(outcome.is_err(), "call returned a reply it did not ask for");
    Ok(())
}

#[tokio::test]
async fn test_no_responder_waits_indefinitely() -> Result<()> {
    // ---
    let hub = MemoryHub::new();
    let mut client = client(&hub, "client").await?;

    // Without a request_timeout the call does not return; bound it here.
    let outcome = tokio::time::timeout(Duration::from_millis(300), client.call(SAMPLE_ZONE)).await;

    assert!(outcome.is_err(), "call unexpectedly completed: {outcome:?}");
    client.close().await
}

#[tokio::test]
async fn test_request_timeout_surfaces_error() -> Result<()> {
    // ---
    let hub = MemoryHub::new();
    let mut client = ClientBuilder::new(transport(&hub, "client").await?)
        .request_timeout(Duration::from_millis(50))
        .build()
        .await?;

    let result = client.call(SAMPLE_ZONE).await;
    assert!(matches!(result, Err(RpcError::Timeout)));

    // The client stays usable once a responder shows up.
    let _stub = ok_responder(&hub).await?;
    let reply = client.call(SAMPLE_ZONE).await?;
    assert_eq!(reply, Bytes::from_static(b"OK"));
    client.close().await
}

#[tokio::test]
async fn test_retry_republishes_with_new_token() -> Result<()> {
    // ---
    let hub = MemoryHub::new();

    // Swallows the first request, answers the rest with their token.
    let slow = transport(&hub, "slow").await?;
    let mut requests = slow.subscribe(Subscription::from(DEFAULT_DESTINATION)).await?;
    let tokens = Arc::new(std::sync::Mutex::new(Vec::new()));
    let seen = tokens.clone();
    let _server = tokio::spawn(async move {
        while let Some(request) = requests.inbox.recv().await {
            let correlation_id = request.correlation_id.clone().unwrap();
            let first = {
                let mut seen = seen.lock().unwrap();
                seen.push(correlation_id.to_string());
                seen.len() == 1
            };
            if first {
                continue;
            }
            let reply = Envelope::response(
                request.reply_to.clone().unwrap(),
                Bytes::from_static(b"OK"),
                correlation_id,
                Arc::from("application/json"),
            );
            slow.publish(reply).await.unwrap();
        }
    });

    let mut client = ClientBuilder::new(transport(&hub, "client").await?)
        .request_timeout(Duration::from_millis(50))
        .retry_max_attempts(3)
        .retry_initial_delay(Duration::from_millis(10))
        .retry_max_delay(Duration::from_millis(20))
        .build()
        .await?;

    let reply = client.call(SAMPLE_ZONE).await?;
    assert_eq!(reply, Bytes::from_static(b"OK"));

    let tokens = tokens.lock().unwrap().clone();
    assert_eq!(tokens.len(), 2);
    assert_ne!(tokens[0], tokens[1]);
    client.close().await
}

#[tokio::test]
async fn test_retry_exhaustion() -> Result<()> {
    // ---
    let hub = MemoryHub::new();
    let mut client = ClientBuilder::new(transport(&hub, "client").await?)
        .request_timeout(Duration::from_millis(20))
        .retry_max_attempts(2)
        .retry_initial_delay(Duration::from_millis(5))
        .build()
        .await?;

    let result = client.call(SAMPLE_ZONE).await;
    assert!(matches!(result, Err(RpcError::TransportRetryable(_))));
    client.close().await
}

#[tokio::test]
async fn test_closed_transport_reports_connection_lost() -> Result<()> {
    // ---
    let hub = MemoryHub::new();
    let client_transport = transport(&hub, "client").await?;
    let mut client = ClientBuilder::new(client_transport.clone()).build().await?;

    let closer = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        client_transport.close().await
    });

    let result = tokio::time::timeout(Duration::from_secs(2), client.call(SAMPLE_ZONE))
        .await
        .expect("call kept waiting after the reply queue went away");
    assert!(matches!(result, Err(RpcError::ConnectionLost)));

    closer.await.expect("closer panicked")?;

    // Later calls fail fast too.
    let again = client.call(SAMPLE_ZONE).await;
    assert!(matches!(again, Err(RpcError::ConnectionLost)));
    Ok(())
}

#[tokio::test]
async fn test_clients_on_one_hub_are_isolated() -> Result<()> {
    // ---
    let hub = MemoryHub::new();
    let (_echo, seen) = echo_id_responder(&hub, 0).await?;
    let mut alice = client(&hub, "alice").await?;
    let mut bob = client(&hub, "bob").await?;

    assert_ne!(alice.reply_address(), bob.reply_address());

    let (a, b) = tokio::join!(alice.call("a"), bob.call("b"));
    assert_ne!(a?, b?);
    assert_eq!(seen.load(Ordering::SeqCst), 2);

    alice.close().await?;
    bob.close().await
}

#[tokio::test]
async fn test_closing_one_client_spares_another_with_same_node_id() -> Result<()> {
    // ---
    let hub = MemoryHub::new();
    let _stub = ok_responder(&hub).await?;
    let first = client(&hub, "cli").await?;
    let mut second = client(&hub, "cli").await?;

    first.close().await?;

    let reply = tokio::time::timeout(Duration::from_secs(2), second.call("zone"))
        .await
        .expect("second client stopped receiving replies")?;
    assert_eq!(reply, Bytes::from_static(b"OK"));
    second.close().await
}

#[tokio::test]
async fn test_responder_skips_requests_without_routing_metadata() -> Result<()> {
    // ---
    let hub = MemoryHub::new();
    let _stub = ok_responder(&hub).await?;
    let sender = transport(&hub, "raw").await?;

    // No reply_to: nowhere to answer.
    sender
        .publish(Envelope {
            address: Address::from(DEFAULT_DESTINATION),
            payload: Bytes::from_static(b"orphan"),
            correlation_id: Some(Arc::from("orphan-1")),
            reply_to: None,
            content_type: Some(Arc::from("text/dns")),
        })
        .await?;

    // No correlation_id: the answer could never be matched.
    let mut stray = sender.subscribe_private().await?;
    sender
        .publish(Envelope {
            address: Address::from(DEFAULT_DESTINATION),
            payload: Bytes::from_static(b"anonymous"),
            correlation_id: None,
            reply_to: Some(stray.address.clone()),
            content_type: Some(Arc::from("text/dns")),
        })
        .await?;

    // The responder is still serving well-formed requests.
    let mut client = client(&hub, "client").await?;
    let reply = tokio::time::timeout(Duration::from_secs(2), client.call(SAMPLE_ZONE))
        .await
        .expect("responder stopped serving")?;
    assert_eq!(reply, Bytes::from_static(b"OK"));

    let answered = tokio::time::timeout(Duration::from_millis(100), stray.inbox.recv()).await;
    assert!(answered.is_err(), "request without correlation_id was answered");
    client.close().await
}

#[tokio::test]
async fn test_handler_error_sends_no_reply() -> Result<()> {
    // ---
    let hub = MemoryHub::new();
    let stub_transport = transport(&hub, "stub").await?;
    let _stub = Responder::new(stub_transport, DEFAULT_DESTINATION)
        .serve(|_zone: Bytes| async move {
            Err::<Bytes, _>(RpcError::Transport("unparsable zone".into()))
        })
        .await?;

    let mut client = ClientBuilder::new(transport(&hub, "client").await?)
        .request_timeout(Duration::from_millis(100))
        .build()
        .await?;

    let result = client.call(SAMPLE_ZONE).await;
    assert!(matches!(result, Err(RpcError::Timeout)), "got {result:?}");
    client.close().await
}

#[tokio::test]
async fn test_reply_carries_configured_content_type() -> Result<()> {
    // ---
    let hub = MemoryHub::new();
    let stub_transport = transport(&hub, "stub").await?;
    let _stub = Responder::new(stub_transport, DEFAULT_DESTINATION)
        .content_type("text/plain")
        .serve(|_zone: Bytes| async move { Ok(Bytes::from_static(b"OK")) })
        .await?;

    let requester = transport(&hub, "raw").await?;
    let mut replies = requester.subscribe_private().await?;
    requester
        .publish(Envelope::request(
            Address::from(DEFAULT_DESTINATION),
            Bytes::from_static(SAMPLE_ZONE.as_bytes()),
            Arc::from("ct-1"),
            replies.address.clone(),
            Arc::from("text/dns"),
        ))
        .await?;

    let reply = tokio::time::timeout(Duration::from_secs(2), replies.inbox.recv())
        .await
        .expect("no reply")
        .expect("reply queue closed");
    assert_eq!(reply.correlation_id.as_deref(), Some("ct-1"));
    assert_eq!(reply.content_type.as_deref(), Some("text/plain"));
    assert_eq!(reply.payload, Bytes::from_static(b"OK"));
    Ok(())
}
