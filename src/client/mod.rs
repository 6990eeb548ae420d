//! Correlated request/reply client.
//!
//! [`CorrelatedRequestClient`] publishes a payload to a well-known
//! destination with a fresh correlation token and a private reply address,
//! then waits for the reply that carries the same token.
//!
//! A background task drains the private reply subscription and hands the
//! matching reply to the waiting call through a one-shot channel held in a
//! single [`PendingSlot`]. Replies with any other token are dropped.

mod pending;

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use tokio::task::JoinHandle;
use tokio::time;

use crate::retry::retry_with_backoff;
use crate::{
    // ---
    log_debug,
    log_info,
    log_warn,
    Address,
    CorrelationId,
    Envelope,
    Result,
    RetryConfig,
    RpcError,
    SubscriptionHandle,
    TransportPtr,
};
use pending::PendingSlot;

/// Queue the zone2json service consumes requests from.
pub const DEFAULT_DESTINATION: &str = "zone2json";

/// Content type attached to zone payloads.
pub const DEFAULT_CONTENT_TYPE: &str = "text/dns";

/// Acquire mutex guard, ignoring poisoning
fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Client that sends one request at a time and returns its correlated reply.
///
/// The broker connection (via the transport) and the private reply address
/// are acquired at construction and held until [`close`](Self::close) or
/// drop. [`call`](Self::call) takes `&mut self`, so a client instance can
/// only ever have one outstanding request.
///
/// # Example
///
/// ```no_run
/// use zone2json_rpc::{ClientBuilder, TransportBuilder};
/// use std::time::Duration;
///
/// # async fn example() -> zone2json_rpc::Result<()> {
/// let transport = TransportBuilder::new()
///     .uri("amqp://localhost:5672/%2f")
///     .node_id("zone2json-client")
///     .build()
///     .await?;
///
/// let mut client = ClientBuilder::new(transport)
///     .request_timeout(Duration::from_secs(30))
///     .build()
///     .await?;
///
/// let json = client.call_text("$ORIGIN example.com.\n@ IN A 192.0.2.1\n").await?;
/// println!("{json}");
///
/// client.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct CorrelatedRequestClient {
    // ---
    transport: TransportPtr,
    destination: Address,
    content_type: Arc<str>,
    reply_to: Address,
    request_timeout: Option<Duration>,
    retry_config: Option<RetryConfig>,
    pending: Arc<Mutex<PendingSlot>>,
    rx_task: JoinHandle<()>,
}

impl CorrelatedRequestClient {
    // ---
    async fn start(
        transport: TransportPtr,
        destination: Address,
        content_type: Arc<str>,
        request_timeout: Option<Duration>,
        retry_config: Option<RetryConfig>,
    ) -> Result<Self> {
        // ---
        let handle = transport.subscribe_private().await?;
        let reply_to = handle.address.clone();

        log_info!(
            "[{}] reply queue {reply_to} ready, requests go to {destination}",
            transport.transport_id()
        );

        let pending = Arc::new(Mutex::new(PendingSlot::new()));
        let rx_task = Self::start_reply_task(handle, Arc::clone(&pending));

        Ok(Self {
            transport,
            destination,
            content_type,
            reply_to,
            request_timeout,
            retry_config,
            pending,
            rx_task,
        })
    }

    // Drains the reply subscription into the pending slot.
    fn start_reply_task(
        mut handle: SubscriptionHandle,
        pending: Arc<Mutex<PendingSlot>>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(envelope) = handle.inbox.recv().await {
                let Some(correlation_id) = envelope.correlation_id.as_deref() else {
                    log_warn!("reply on {} missing correlation_id", handle.address);
                    continue;
                };

                let accepted =
                    lock_ignore_poison(&pending).fulfill(correlation_id, envelope.payload);

                if !accepted {
                    log_debug!("ignoring reply with unexpected correlation_id: {correlation_id}");
                }
            }

            lock_ignore_poison(&pending).close();
            log_debug!("reply task stopped for {}", handle.address);
        })
    }

    /// Send `payload` and wait for the reply carrying the same correlation id.
    ///
    /// Messages on the reply address with any other correlation id are
    /// ignored and do not end the wait.
    ///
    /// # Waiting
    ///
    /// Without a `request_timeout` this waits for as long as it takes; with
    /// no responder on the destination it never returns. Set a timeout on
    /// the builder to bound it.
    ///
    /// # Errors
    ///
    /// - [`RpcError::Timeout`] if `request_timeout` elapses (no retry configured)
    /// - [`RpcError::TransportRetryable`] if every retry attempt timed out
    /// - [`RpcError::ConnectionLost`] if the reply subscription ended
    /// - [`RpcError::Transport`] if publishing failed
    pub async fn call(&mut self, payload: impl Into<Bytes>) -> Result<Bytes> {
        // ---
        let payload = payload.into();
        let this: &Self = self;

        retry_with_backoff(this.retry_config.as_ref(), move || {
            this.attempt(payload.clone())
        })
        .await
    }

    /// Send zone text and decode the reply as UTF-8.
    pub async fn call_text(&mut self, text: &str) -> Result<String> {
        // ---
        let reply = self.call(Bytes::copy_from_slice(text.as_bytes())).await?;
        Ok(String::from_utf8(reply.to_vec())?)
    }

    // One publish/await cycle with its own correlation token.
    async fn attempt(&self, payload: Bytes) -> Result<Bytes> {
        // ---
        let correlation_id = CorrelationId::generate();

        let rx = {
            let mut slot = lock_ignore_poison(&self.pending);
            slot.clear();
            slot.arm(correlation_id.clone())?
        };

        let env = Envelope::request(
            self.destination.clone(),
            payload,
            correlation_id.to_arc(),
            self.reply_to.clone(),
            Arc::clone(&self.content_type),
        );

        if let Err(err) = self.transport.publish(env).await {
            lock_ignore_poison(&self.pending).clear();
            return Err(err);
        }

        log_debug!("sent request {correlation_id} to {}", self.destination);

        let reply = match self.request_timeout {
            None => rx.await,
            Some(limit) => match time::timeout(limit, rx).await {
                Ok(reply) => reply,
                Err(_) => {
                    lock_ignore_poison(&self.pending).clear();

                    return Err(if self.retry_config.is_some() {
                        RpcError::TransportRetryable(format!(
                            "no reply to {correlation_id} within {limit:?}"
                        ))
                    } else {
                        RpcError::Timeout
                    });
                }
            },
        };

        // Sender dropped without a value: the slot was closed.
        reply.map_err(|_| RpcError::ConnectionLost)
    }

    /// Broker-generated address replies are consumed from.
    pub fn reply_address(&self) -> &Address {
        &self.reply_to
    }

    /// Address requests are published to.
    pub fn destination(&self) -> &Address {
        &self.destination
    }

    /// Stop the reply task and close the underlying transport.
    pub async fn close(self) -> Result<()> {
        // ---
        self.rx_task.abort();
        self.transport.close().await
    }
}

impl Drop for CorrelatedRequestClient {
    fn drop(&mut self) {
        self.rx_task.abort();
    }
}

/// Builder for [`CorrelatedRequestClient`].
///
/// Every option has a default; only the transport is required.
pub struct ClientBuilder {
    // ---
    transport: TransportPtr,
    destination: Option<String>,
    content_type: Option<String>,

    // Request timeout (optional, default: wait indefinitely)
    request_timeout: Option<Duration>,

    // Retry configuration (all optional)
    retry_max_attempts: Option<u32>,
    retry_multiplier: Option<f32>,
    retry_initial_delay: Option<Duration>,
    retry_max_delay: Option<Duration>,
}

impl ClientBuilder {
    /// Create a new client builder over `transport`.
    pub fn new(transport: TransportPtr) -> Self {
        // ---
        Self {
            transport,
            destination: None,
            content_type: None,
            request_timeout: None,
            retry_max_attempts: None,
            retry_multiplier: None,
            retry_initial_delay: None,
            retry_max_delay: None,
        }
    }

    /// Destination queue for requests.
    ///
    /// Default: `"zone2json"`.
    pub fn destination(mut self, queue: impl Into<String>) -> Self {
        self.destination = Some(queue.into());
        self
    }

    /// Content type attached to every request.
    ///
    /// Default: `"text/dns"`.
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Bound the wait for each request attempt.
    ///
    /// Default: none, a call waits until its reply arrives.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Set maximum retry attempts after a timed-out attempt.
    ///
    /// Default: no retries.
    pub fn retry_max_attempts(mut self, attempts: u32) -> Self {
        self.retry_max_attempts = Some(attempts);
        self
    }

    /// Set retry backoff multiplier.
    ///
    /// Default: 2.0.
    pub fn retry_multiplier(mut self, multiplier: f32) -> Self {
        self.retry_multiplier = Some(multiplier);
        self
    }

    /// Set initial delay before the first retry.
    ///
    /// Default: 100ms.
    pub fn retry_initial_delay(mut self, delay: Duration) -> Self {
        self.retry_initial_delay = Some(delay);
        self
    }

    /// Set maximum delay between retry attempts.
    ///
    /// Default: 5s.
    pub fn retry_max_delay(mut self, delay: Duration) -> Self {
        self.retry_max_delay = Some(delay);
        self
    }

    /// Use a complete retry configuration.
    pub fn retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_max_attempts = Some(config.max_attempts);
        self.retry_multiplier = Some(config.multiplier);
        self.retry_initial_delay = Some(config.initial_delay);
        self.retry_max_delay = Some(config.max_delay);
        self
    }

    /// Subscribe the private reply address and start the client.
    ///
    /// # Errors
    ///
    /// - [`RpcError::MissingConfig`] if the destination is empty
    /// - [`RpcError::ConfigConflict`] for a zero timeout, or retry without a timeout
    /// - transport errors from subscribing the reply address
    pub async fn build(self) -> Result<CorrelatedRequestClient> {
        // ---
        let destination = self
            .destination
            .unwrap_or_else(|| DEFAULT_DESTINATION.to_string());
        if destination.is_empty() {
            return Err(RpcError::MissingConfig("destination".into()));
        }

        let content_type = self
            .content_type
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

        if self.request_timeout == Some(Duration::ZERO) {
            return Err(RpcError::ConfigConflict(
                "request_timeout must be greater than zero".into(),
            ));
        }

        // Build retry config only if at least one retry parameter was set
        let retry_config = if self.retry_max_attempts.is_some()
            || self.retry_multiplier.is_some()
            || self.retry_initial_delay.is_some()
            || self.retry_max_delay.is_some()
        {
            let defaults = RetryConfig::default();
            Some(RetryConfig {
                max_attempts: self.retry_max_attempts.unwrap_or(defaults.max_attempts),
                multiplier: self.retry_multiplier.unwrap_or(defaults.multiplier),
                initial_delay: self.retry_initial_delay.unwrap_or(defaults.initial_delay),
                max_delay: self.retry_max_delay.unwrap_or(defaults.max_delay),
            })
        } else {
            None
        };

        // Only a timed-out attempt is retryable.
        if retry_config.is_some() && self.request_timeout.is_none() {
            return Err(RpcError::ConfigConflict(
                "retry requires a request_timeout".into(),
            ));
        }

        CorrelatedRequestClient::start(
            self.transport,
            Address::from(destination),
            Arc::from(content_type),
            self.request_timeout,
            retry_config,
        )
        .await
    }
}
