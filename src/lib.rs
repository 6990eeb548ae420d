//! Correlated request/reply RPC over a message broker.
//!
//! This library sends a payload to a well-known queue (by default the
//! `zone2json` DNS zone converter) and waits for the reply that carries the
//! same correlation id. It handles correlation id generation, the private
//! reply queue, reply matching, optional timeouts and retries.
//!
//! ```no_run
//! use zone2json_rpc::{ClientBuilder, TransportBuilder};
//!
//! # async fn example() -> zone2json_rpc::Result<()> {
//! let transport = TransportBuilder::new()
//!     .uri("amqp://localhost:5672/%2f")
//!     .node_id("zone2json-client")
//!     .build()
//!     .await?;
//!
//! let mut client = ClientBuilder::new(transport).build().await?;
//! let json = client.call_text("$ORIGIN example.com.\n").await?;
//! client.close().await?;
//! # Ok(())
//! # }
//! ```

// Import all sub modules once...
mod macros;

mod client;
mod domain;
mod responder;
mod transport;

mod correlation;
mod error;
mod retry;
mod transport_builder;

pub(crate) use macros::{log_debug, log_error, log_info, log_warn};

// Re-export main types
pub use client::{
    //
    ClientBuilder,
    CorrelatedRequestClient,
    DEFAULT_CONTENT_TYPE,
    DEFAULT_DESTINATION,
};
pub use responder::{Responder, DEFAULT_REPLY_CONTENT_TYPE};

pub use correlation::CorrelationId;
pub use error::{Result, RpcError};
pub use retry::RetryConfig;
pub use transport_builder::TransportBuilder;

pub use transport::{
    //
    create_lapin_transport,
    create_memory_transport,
    create_memory_transport_with_hub,
    MemoryHub,
};

// --- public re-exports
pub use domain::{
    //
    Address,
    Envelope,
    Subscription,
    SubscriptionHandle,
    Transport,
    TransportBase,
    TransportConfig,
    TransportPtr,
};
