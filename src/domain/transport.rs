// src/domain/transport.rs

//! Transport domain abstractions.
//!
//! This module defines the domain-level transport interface used by the
//! request client and the responder to exchange messages. It intentionally
//! avoids any reference to concrete protocols, brokers, or client libraries.
//!
//! The transport layer is responsible only for delivering opaque envelopes
//! to subscribed consumers. Correlation, timeouts and retries are handled
//! by the client layer.
//!
//! Concrete implementations of this interface live under `src/transport/`.
use crate::Result;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

/// Shared base state for all transport implementations.
///
/// Each concrete transport embeds this as a field named `base` so the
/// default `Transport` accessors can delegate to it.
pub struct TransportBase {
    /// Unique identifier for this transport instance (the node_id).
    pub transport_id: String,
}

impl From<&TransportConfig> for TransportBase {
    fn from(config: &TransportConfig) -> Self {
        // ---
        Self {
            transport_id: config.node_id.clone(),
        }
    }
}

/// Configuration for creating a transport instance.
///
/// Produced by [`TransportBuilder`](crate::TransportBuilder) and passed to
/// the transport factory functions (`create_*_transport()`).
#[derive(Clone, Debug)]
pub struct TransportConfig {
    /// Broker URI (e.g. `"amqp://localhost:5672/%2f"`, `"memory://"`)
    pub uri: String,
    /// Node ID for this transport instance, used in logs and consumer tags.
    pub node_id: String,
    /// Optional transport type override (`"memory"` or `"lapin"`).
    /// If `None`, the type is inferred from the URI scheme.
    pub transport_type: Option<String>,
}

/// A transport address.
///
/// An `Address` names a destination to which messages may be published.
/// For AMQP it is the routing key on the default exchange, which is the
/// queue name. It is treated as an opaque identifier at the domain level.
///
/// Addresses are immutable, cheap to clone, and safe to share across threads.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Address(pub Arc<str>);

impl Address {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<T> From<T> for Address
where
    T: Into<Arc<str>>,
{
    fn from(value: T) -> Self {
        // ---
        Address(value.into())
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A subscription identifier.
///
/// Matches published addresses by exact string equality. The in-memory
/// transport provides the reference semantics for matching.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Subscription(pub Arc<str>);

impl From<Address> for Subscription {
    fn from(address: Address) -> Self {
        // ---
        Subscription(address.0)
    }
}

impl<T> From<T> for Subscription
where
    T: Into<Arc<str>>,
{
    fn from(value: T) -> Self {
        // ---
        Subscription(value.into())
    }
}

/// An opaque message envelope.
///
/// An `Envelope` is the unit of transport between producers and consumers.
/// It carries a payload along with the metadata used for reply routing and
/// correlation. On AMQP these map one-to-one onto the `reply_to`,
/// `correlation_id` and `content_type` basic properties.
///
/// # Examples
///
/// ```
/// # use zone2json_rpc::{Envelope, Address};
/// # use bytes::Bytes;
/// # use std::sync::Arc;
/// let request = Envelope::request(
///     Address::from("zone2json"),
///     Bytes::from_static(b"$ORIGIN example.com."),
///     Arc::from("correlation-123"),
///     Address::from("amq.gen-reply"),
///     Arc::from("text/dns"),
/// );
///
/// let reply = Envelope::response(
///     request.reply_to.clone().unwrap(),
///     Bytes::from_static(b"{}"),
///     Arc::from("correlation-123"),
///     Arc::from("application/json"),
/// );
/// assert_eq!(reply.address.as_str(), "amq.gen-reply");
/// ```
#[derive(Clone, Debug)]
pub struct Envelope {
    // ---
    /// Delivery address used by the transport.
    pub address: Address,

    /// Opaque payload bytes.
    pub payload: Bytes,

    /// Correlation identifier used to associate requests with responses.
    pub correlation_id: Option<Arc<str>>,

    /// Address where the response should be sent, present on requests.
    pub reply_to: Option<Address>,

    /// Optional content type metadata (e.g. `"text/dns"`).
    ///
    /// Informational only; not enforced by the RPC layer.
    pub content_type: Option<Arc<str>>,
}

impl Envelope {
    // ---
    /// Create a request envelope.
    ///
    /// # Arguments
    ///
    /// * `address` - Destination address (e.g. `"zone2json"`)
    /// * `payload` - Request body
    /// * `correlation_id` - Unique identifier for matching the response
    /// * `reply_to` - Address where the response should be sent
    /// * `content_type` - Payload format (e.g. `"text/dns"`)
    pub fn request(
        address: Address,
        payload: Bytes,
        correlation_id: Arc<str>,
        reply_to: Address,
        content_type: Arc<str>,
    ) -> Self {
        // ---
        Self {
            address,
            payload,
            correlation_id: Some(correlation_id),
            reply_to: Some(reply_to),
            content_type: Some(content_type),
        }
    }

    /// Create a response envelope.
    ///
    /// # Arguments
    ///
    /// * `address` - Destination address (from the request's `reply_to` field)
    /// * `payload` - Response body
    /// * `correlation_id` - Correlation ID copied from the request
    /// * `content_type` - Payload format
    pub fn response(
        address: Address,
        payload: Bytes,
        correlation_id: Arc<str>,
        content_type: Arc<str>,
    ) -> Self {
        // ---
        Self {
            address,
            payload,
            correlation_id: Some(correlation_id),
            reply_to: None,
            content_type: Some(content_type),
        }
    }
}

/// Handle returned from a successful subscription.
///
/// The subscription remains active until the transport is closed or the
/// underlying broker consumer ends, at which point `inbox` yields `None`.
pub struct SubscriptionHandle {
    // ---
    /// Address actually consumed. For private subscriptions this is the
    /// broker-generated name to use as `reply_to`.
    pub address: Address,

    /// Receiver channel for delivered envelopes matching this subscription.
    pub inbox: mpsc::Receiver<Envelope>,
}

/// Transport abstraction.
///
/// A `Transport` provides best-effort delivery of message envelopes between
/// producers and subscribers. It commits to no specific protocol or broker.
///
/// Implementations must ensure that:
/// - Once `subscribe()` or `subscribe_private()` returns successfully,
///   messages published *after* that point and matching the subscription
///   are deliverable.
/// - Messages published to an address nobody subscribes to are dropped.
/// - `publish()` does not wait for subscribers to process the message.
///
/// # Available Implementations
///
/// - `create_memory_transport` - In-memory transport (always available)
/// - `create_lapin_transport` - AMQP 0-9-1 (feature `transport_lapin`)
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    // ---
    /// Returns a reference to the shared base state.
    fn base(&self) -> &TransportBase;

    /// Returns the transport_id of the transport.
    fn transport_id(&self) -> &str {
        &self.base().transport_id
    }

    /// Publish an envelope to its address.
    async fn publish(&self, env: Envelope) -> Result<()>;

    /// Subscribe to a well-known, named destination.
    async fn subscribe(&self, sub: Subscription) -> Result<SubscriptionHandle>;

    /// Subscribe to a private, exclusive destination whose name is chosen by
    /// the broker. Only this transport instance consumes from it.
    async fn subscribe_private(&self) -> Result<SubscriptionHandle>;

    /// Close the transport and release any associated resources.
    async fn close(&self) -> Result<()>;
}

/// Shared transport pointer.
///
/// `.clone()` is cheap and all clones share the same underlying connection.
pub type TransportPtr = Arc<dyn Transport>;
