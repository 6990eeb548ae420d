//! In-memory transport implementation.
//!
//! This module provides a pure in-process implementation of the domain-level
//! `Transport` trait. It is intended for tests, demos, and as the reference
//! for transport semantics.
//!
//! ## Reference Semantics
//!
//! - Once `subscribe()` returns successfully, messages published *after* that
//!   point and matching the subscription are deliverable.
//! - Matching is exact string equality between address and subscription.
//! - Messages published to an address with no subscribers are dropped, the
//!   way a broker drops unroutable messages on the default exchange.
//! - Private subscriptions get a unique generated name (`amq.gen-...`) that
//!   no other transport knows unless it is told (e.g. via `reply_to`).
//! - Closing a transport removes only its own subscriptions; their inboxes
//!   yield `None` afterwards.
//!
//! ## Non-Goals
//!
//! This transport does not emulate broker failure modes or persistence.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::{
    // ---
    log_debug,
    Address,
    Envelope,
    Result,
    RpcError,
    Subscription,
    SubscriptionHandle,
    Transport,
    TransportBase,
    TransportConfig,
    TransportPtr,
};

/// Inbox capacity for each subscription.
const INBOX_CAPACITY: usize = 16;

/// Subscriber entry: owner key of the subscribing transport plus its inbox sender.
type Subscriber = (String, mpsc::Sender<Envelope>);

/// Shared message bus for the in-memory transport.
///
/// Simulates a message broker within a single process. All transports that
/// share a `MemoryHub` can publish and receive each other's messages, exactly
/// as nodes connected to a real broker would.
///
/// Integration tests that run in parallel should construct a hub per test
/// and pass it to [`create_memory_transport_with_hub`]:
///
/// ```
/// # use zone2json_rpc::{MemoryHub, TransportConfig};
/// # async fn example() -> zone2json_rpc::Result<()> {
/// let hub = MemoryHub::new();
///
/// let config = TransportConfig {
///     uri: "memory://".into(),
///     node_id: "client".into(),
///     transport_type: None,
/// };
///
/// let transport = zone2json_rpc::create_memory_transport_with_hub(config, hub.clone()).await?;
/// # Ok(())
/// # }
/// ```
pub struct MemoryHub {
    // ---
    subscriptions: RwLock<HashMap<Subscription, Vec<Subscriber>>>,
}

impl MemoryHub {
    /// Create a new, empty hub.
    pub fn new() -> Arc<Self> {
        // ---
        Arc::new(Self::default())
    }

    async fn publish(&self, owner: &str, env: Envelope) -> Result<()> {
        // ---
        // Clone senders out so the lock is not held across awaits.
        let senders: Vec<mpsc::Sender<Envelope>> = {
            let subs = self.subscriptions.read().await;
            subs.get(&Subscription(env.address.0.clone()))
                .map(|list| list.iter().map(|(_, tx)| tx.clone()).collect())
                .unwrap_or_default()
        };

        if senders.is_empty() {
            log_debug!("{owner}: no subscribers for {}, dropped", env.address);
            return Ok(());
        }

        log_debug!("{owner}: publish to {} ({} subscribers)", env.address, senders.len());

        for sender in senders {
            // A closed channel indicates a dropped SubscriptionHandle.
            if let Err(_err) = sender.send(env.clone()).await {
                log_debug!("{owner}: subscriber gone: {_err:?}");
            }
        }

        Ok(())
    }

    async fn subscribe(&self, owner: &str, sub: Subscription) -> Result<SubscriptionHandle> {
        // ---
        log_debug!("{owner}: subscribe to {sub:?}");

        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);

        let address = Address(sub.0.clone());
        let mut subs = self.subscriptions.write().await;
        subs.entry(sub)
            .or_default()
            .push((owner.to_string(), tx));

        Ok(SubscriptionHandle { address, inbox: rx })
    }

    async fn subscribe_private(&self, owner: &str) -> Result<SubscriptionHandle> {
        // ---
        let name = format!("amq.gen-{}", Uuid::new_v4().simple());

        {
            let subs = self.subscriptions.read().await;
            if subs.contains_key(&Subscription::from(name.as_str())) {
                return Err(RpcError::Transport(format!(
                    "memory: private queue name collision: {name}"
                )));
            }
        }

        self.subscribe(owner, Subscription::from(name)).await
    }

    async fn close(&self, owner: &str) -> Result<()> {
        // ---
        log_debug!("{owner}: closing transport...");

        let mut subs = self.subscriptions.write().await;
        for list in subs.values_mut() {
            list.retain(|(key, _)| key != owner);
        }
        subs.retain(|_, list| !list.is_empty());
        Ok(())
    }
}

impl Default for MemoryHub {
    fn default() -> Self {
        // ---
        Self {
            subscriptions: RwLock::new(HashMap::new()),
        }
    }
}

/// Process-global hub used by [`create_memory_transport`].
static GLOBAL_HUB: OnceLock<Arc<MemoryHub>> = OnceLock::new();

fn global_hub() -> Arc<MemoryHub> {
    GLOBAL_HUB.get_or_init(MemoryHub::new).clone()
}

/// In-memory transport.
///
/// Routes messages through a shared [`MemoryHub`]. Subscriptions are keyed
/// by `owner`, which is unique per instance even when node ids repeat.
struct MemoryTransport {
    // ---
    base: TransportBase,
    owner: String,
    hub: Arc<MemoryHub>,
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    // ---
    fn base(&self) -> &TransportBase {
        &self.base
    }

    async fn publish(&self, env: Envelope) -> Result<()> {
        self.hub.publish(&self.owner, env).await
    }

    async fn subscribe(&self, sub: Subscription) -> Result<SubscriptionHandle> {
        self.hub.subscribe(&self.owner, sub).await
    }

    async fn subscribe_private(&self) -> Result<SubscriptionHandle> {
        self.hub.subscribe_private(&self.owner).await
    }

    /// Remove this transport's subscriptions from the hub. Subscriptions
    /// owned by other transports on the same hub are left intact.
    async fn close(&self) -> Result<()> {
        self.hub.close(&self.owner).await
    }
}

/// Create a new in-memory transport using the process-global hub.
///
/// All transports created with this function share a single message bus.
/// For isolated parallel testing, use [`create_memory_transport_with_hub`].
///
/// # Errors
///
/// Currently infallible; always returns `Ok`.
pub async fn create_memory_transport(config: TransportConfig) -> Result<TransportPtr> {
    // ---
    create_memory_transport_with_hub(config, global_hub()).await
}

/// Create a new in-memory transport using the provided hub.
///
/// # Errors
///
/// Currently infallible; always returns `Ok`.
pub async fn create_memory_transport_with_hub(
    config: TransportConfig,
    hub: Arc<MemoryHub>,
) -> Result<TransportPtr> {
    // ---
    log_debug!("{}: create memory transport", config.node_id);

    let transport = MemoryTransport {
        base: TransportBase::from(&config),
        owner: format!("{}-{}", config.node_id, Uuid::new_v4().simple()),
        hub,
    };

    Ok(Arc::new(transport))
}
