//! Domain layer public interface.
//!
//! Abstractions here are independent of any broker or client library.
//! Consumers import symbols via this module, not individual files.

mod transport;

// --- Transport domain re-exports ---

pub use transport::{
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
