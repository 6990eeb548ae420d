//! Request responder.
//!
//! The server-side counterpart of [`CorrelatedRequestClient`](crate::CorrelatedRequestClient):
//! consumes a named request queue, runs a handler on every request body and
//! publishes the handler's output to the request's `reply_to` address with
//! the request's correlation id.
//!
//! Used as a stand-in for the zone2json service in tests and demos.

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use tokio::task::JoinHandle;

use crate::{
    // ---
    log_debug,
    log_error,
    log_info,
    log_warn,
    Envelope,
    Result,
    Subscription,
    TransportPtr,
};

/// Content type attached to replies unless overridden.
pub const DEFAULT_REPLY_CONTENT_TYPE: &str = "application/json";

/// Serves correlated requests arriving on one queue.
///
/// # Example
///
/// ```no_run
/// use zone2json_rpc::{Responder, TransportBuilder};
/// use bytes::Bytes;
///
/// # async fn example() -> zone2json_rpc::Result<()> {
/// let transport = TransportBuilder::new()
///     .uri("amqp://localhost:5672/%2f")
///     .node_id("zone2json-stub")
///     .build()
///     .await?;
///
/// let task = Responder::new(transport, "zone2json")
///     .serve(|_zone: Bytes| async move { Ok(Bytes::from_static(b"OK")) })
///     .await?;
/// task.await.ok();
/// # Ok(())
/// # }
/// ```
pub struct Responder {
    // ---
    transport: TransportPtr,
    queue: String,
    content_type: Arc<str>,
}

impl Responder {
    /// Create a responder for `queue` on `transport`.
    pub fn new(transport: TransportPtr, queue: impl Into<String>) -> Self {
        // ---
        Self {
            transport,
            queue: queue.into(),
            content_type: Arc::from(DEFAULT_REPLY_CONTENT_TYPE),
        }
    }

    /// Content type attached to every reply.
    pub fn content_type(mut self, content_type: impl Into<Arc<str>>) -> Self {
        self.content_type = content_type.into();
        self
    }

    /// Subscribe to the queue and spawn the serve loop.
    ///
    /// Returns once the subscription is live, so requests published after
    /// this call are served. The returned task ends when the subscription
    /// ends (transport closed or broker consumer gone).
    ///
    /// Requests lacking `reply_to` or `correlation_id` are skipped. A handler
    /// error is logged and no reply is sent; the requester then sees its own
    /// timeout.
    pub async fn serve<F, Fut>(self, handler: F) -> Result<JoinHandle<()>>
    where
        F: Fn(Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Bytes>> + Send + 'static,
    {
        // ---
        let mut handle = self
            .transport
            .subscribe(Subscription::from(self.queue.as_str()))
            .await?;

        log_info!(
            "[{}] serving requests on {}",
            self.transport.transport_id(),
            self.queue
        );

        let handler = Arc::new(handler);
        let transport = self.transport;
        let content_type = self.content_type;
        let queue = self.queue;

        Ok(tokio::spawn(async move {
            while let Some(envelope) = handle.inbox.recv().await {
                let Some(reply_to) = envelope.reply_to.clone() else {
                    log_warn!("request on {queue} missing reply_to");
                    continue;
                };

                let Some(correlation_id) = envelope.correlation_id.clone() else {
                    log_warn!("request on {queue} missing correlation_id");
                    continue;
                };

                log_debug!("request {correlation_id} on {queue}, reply to {reply_to}");

                let handler = Arc::clone(&handler);
                let transport = transport.clone();
                let content_type = Arc::clone(&content_type);

                tokio::spawn(async move {
                    let payload = match handler(envelope.payload).await {
                        Ok(bytes) => bytes,
                        Err(e) => {
                            log_error!("handler error for {correlation_id}: {e}");
                            return;
                        }
                    };

                    let reply = Envelope::response(reply_to, payload, correlation_id, content_type);

                    if let Err(e) = transport.publish(reply).await {
                        log_error!("failed to publish reply: {e}");
                    }
                });
            }

            log_debug!("responder stopped for {queue}");
        }))
    }
}
