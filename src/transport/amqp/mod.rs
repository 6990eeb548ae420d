//! AMQP protocol transports.
//!
//! Currently supports:
//! - lapin - AMQP 0-9-1 (RabbitMQ)
//!
//! When the `transport_lapin` feature is disabled the factory is replaced by
//! a stub that always fails, so callers can dispatch on it unconditionally.

#[cfg(feature = "transport_lapin")]
mod lapin;

#[cfg(feature = "transport_lapin")]
pub use lapin::create_transport as create_lapin_transport;

#[cfg(not(feature = "transport_lapin"))]
pub async fn create_lapin_transport(
    _config: crate::TransportConfig,
) -> crate::Result<crate::TransportPtr> {
    // ---
    Err(crate::RpcError::Transport(
        "lapin transport not compiled in (enable feature `transport_lapin`)".into(),
    ))
}
