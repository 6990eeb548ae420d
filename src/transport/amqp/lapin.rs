//! AMQP transport implementation using `lapin`.
//!
//! This module provides an implementation of the `Transport` trait backed by
//! an AMQP 0-9-1 broker connection (RabbitMQ).
//!
//! ## Concurrency model
//!
//! - A single background **actor task** owns the AMQP connection and channel.
//! - The actor publishes outbound messages, declares queues, starts
//!   consumers and shuts the connection down.
//! - All interaction with the AMQP client is serialized through this actor;
//!   no other task ever touches the connection directly.
//! - One consumer task per consumed queue forwards deliveries to the local
//!   inboxes registered for that queue.
//!
//! ## Message mapping
//!
//! Envelopes are carried natively so the transport interoperates with any
//! AMQP request/reply peer:
//!
//! | Envelope         | AMQP                                   |
//! |------------------|----------------------------------------|
//! | `address`        | routing key on the default exchange    |
//! | `payload`        | message body (raw bytes)               |
//! | `correlation_id` | `correlation_id` basic property        |
//! | `reply_to`       | `reply_to` basic property              |
//! | `content_type`   | `content_type` basic property          |
//!
//! ## Queue semantics
//!
//! - Named queues (`subscribe`) are declared `durable: false`,
//!   `auto_delete: true` and consumed with explicit acks.
//! - Private queues (`subscribe_private`) are declared with an empty name so
//!   the broker picks one, `exclusive: true`, and consumed with `no_ack`.
//!   They live as long as the connection.
//!
//! When a consumer stream ends (connection lost, queue deleted) the inboxes
//! registered for that queue are dropped, so subscribers observe `None`.

use lapin::{
    //
    options::{
        //
        BasicAckOptions,
        BasicConsumeOptions,
        BasicPublishOptions,
        QueueDeclareOptions,
    },
    types::FieldTable,
    BasicProperties,
    Channel,
    Connection,
    ConnectionProperties,
    Consumer,
};

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;

use crate::{
    //
    log_debug,
    log_error,
    log_info,
    log_warn,
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

type SubscriberMap = Arc<RwLock<HashMap<String, Vec<mpsc::Sender<Envelope>>>>>;

/// Inbox capacity for each subscription.
const INBOX_CAPACITY: usize = 16;

//
// Actor commands
//

enum Cmd {
    //
    Publish {
        env: Envelope,
        resp: oneshot::Sender<Result<()>>,
    },
    Subscribe {
        queue: String,
        inbox: mpsc::Sender<Envelope>,
        resp: oneshot::Sender<Result<()>>,
    },
    SubscribePrivate {
        inbox: mpsc::Sender<Envelope>,
        resp: oneshot::Sender<Result<String>>,
    },
    Close {
        resp: oneshot::Sender<Result<()>>,
    },
}

enum ActorStep {
    //
    Cmd(Cmd),
    Closed,
}

/// AMQP transport implementation using lapin.
pub struct AmqpTransport {
    // ---
    base: TransportBase,
    cmd_tx: mpsc::Sender<Cmd>,
    actor: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl AmqpTransport {
    /// Creates a new AMQP transport with the given connection and channel.
    ///
    /// Spawns a background actor task to handle AMQP operations.
    fn create(config: &TransportConfig, connection: Connection, channel: Channel) -> TransportPtr {
        // ---
        let base = TransportBase::from(config);

        let (cmd_tx, cmd_rx) = mpsc::channel(16);

        let actor = Actor {
            transport_id: base.transport_id.clone(),
            connection,
            channel,
            cmd_rx,
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            consumer_handles: HashMap::new(),
        };

        let handle = tokio::spawn(async move {
            actor.run().await;
        });

        Arc::new(Self {
            base,
            cmd_tx,
            actor: tokio::sync::Mutex::new(Some(handle)),
        })
    }

    async fn send_cmd<T>(&self, cmd: Cmd, resp_rx: oneshot::Receiver<Result<T>>) -> Result<T> {
        // ---
        self.cmd_tx.send(cmd).await.map_err(|e| {
            let msg = format!("actor command channel closed:{e}");
            RpcError::Transport(msg)
        })?;

        resp_rx.await.map_err(|e| {
            let msg = format!("actor responder channel read failed:{e}");
            RpcError::Transport(msg)
        })?
    }
}

/// Background actor task that owns the AMQP connection and channel.
struct Actor {
    // ---
    transport_id: String,
    connection: Connection,
    channel: Channel,
    cmd_rx: mpsc::Receiver<Cmd>,
    subscribers: SubscriberMap,
    consumer_handles: HashMap<String, JoinHandle<()>>,
}

impl Actor {
    async fn run(mut self) {
        // ---
        log_info!("[{}] AMQP actor started", self.transport_id);

        loop {
            match self.next_step().await {
                ActorStep::Cmd(cmd) => {
                    self.handle_cmd(cmd).await;
                }
                ActorStep::Closed => {
                    log_info!("[{}] AMQP actor shutting down", self.transport_id);
                    break;
                }
            }
        }

        for (_, handle) in self.consumer_handles.drain() {
            handle.abort();
        }
        self.subscribers.write().await.clear();

        let _ = self.channel.close(200, "Normal shutdown".into()).await;
        let _ = self.connection.close(200, "Normal shutdown".into()).await;

        log_info!("[{}] AMQP actor stopped", self.transport_id);
    }

    async fn next_step(&mut self) -> ActorStep {
        // ---
        match self.cmd_rx.recv().await {
            Some(cmd) => ActorStep::Cmd(cmd),
            None => ActorStep::Closed,
        }
    }

    async fn handle_cmd(&mut self, cmd: Cmd) {
        // ---
        match cmd {
            Cmd::Publish { env, resp } => {
                let result = self.do_publish(env).await;
                let _ = resp.send(result);
            }
            Cmd::Subscribe { queue, inbox, resp } => {
                let result = self.do_subscribe(queue, inbox).await;
                let _ = resp.send(result);
            }
            Cmd::SubscribePrivate { inbox, resp } => {
                let result = self.do_subscribe_private(inbox).await;
                let _ = resp.send(result);
            }
            Cmd::Close { resp } => {
                let _ = resp.send(Ok(()));
                self.cmd_rx.close();
            }
        }
    }

    async fn do_publish(&mut self, env: Envelope) -> Result<()> {
        // ---
        let routing_key = env.address.as_str();

        let mut props = BasicProperties::default();
        if let Some(id) = env.correlation_id.as_deref() {
            props = props.with_correlation_id(id.into());
        }
        if let Some(reply_to) = env.reply_to.as_ref() {
            props = props.with_reply_to(reply_to.as_str().into());
        }
        if let Some(content_type) = env.content_type.as_deref() {
            props = props.with_content_type(content_type.into());
        }

        self.channel
            .basic_publish(
                "".into(),          // default exchange
                routing_key.into(), // routing key = queue name
                BasicPublishOptions::default(),
                &env.payload,
                props,
            )
            .await
            .map_err(|e| RpcError::Transport(format!("amqp: publish failed: {e}")))?;

        log_debug!("[{}] Published to queue: {routing_key}", self.transport_id);
        Ok(())
    }

    async fn do_subscribe(&mut self, queue: String, inbox: mpsc::Sender<Envelope>) -> Result<()> {
        // ---
        let queue_opts = QueueDeclareOptions {
            passive: false,
            durable: false,
            exclusive: false,
            auto_delete: true,
            nowait: false,
        };

        self.channel
            .queue_declare(queue.as_str(), queue_opts, FieldTable::default())
            .await
            .map_err(|e| RpcError::Transport(format!("amqp: queue declare failed: {e}")))?;

        log_info!("[{}] Declared queue: {queue}", self.transport_id);

        self.register(&queue, inbox).await;

        if self.consumer_handles.contains_key(&queue) {
            log_debug!("[{}] Already consuming queue: {queue}", self.transport_id);
            return Ok(());
        }

        self.start_consumer(queue, false).await
    }

    async fn do_subscribe_private(&mut self, inbox: mpsc::Sender<Envelope>) -> Result<String> {
        // ---
        let queue_opts = QueueDeclareOptions {
            exclusive: true,
            ..QueueDeclareOptions::default()
        };

        let declared = self
            .channel
            .queue_declare("".into(), queue_opts, FieldTable::default())
            .await
            .map_err(|e| RpcError::Transport(format!("amqp: reply queue declare failed: {e}")))?;

        let queue = declared.name().as_str().to_string();
        log_info!("[{}] Declared private reply queue: {queue}", self.transport_id);

        self.register(&queue, inbox).await;
        self.start_consumer(queue.clone(), true).await?;

        Ok(queue)
    }

    async fn register(&self, queue: &str, inbox: mpsc::Sender<Envelope>) {
        // ---
        let mut map = self.subscribers.write().await;
        map.entry(queue.to_string()).or_default().push(inbox);
    }

    async fn start_consumer(&mut self, queue: String, no_ack: bool) -> Result<()> {
        // ---
        let consume_opts = BasicConsumeOptions {
            no_ack,
            ..BasicConsumeOptions::default()
        };

        let consumer = self
            .channel
            .basic_consume(
                queue.as_str(),
                &format!("{}-{queue}", self.transport_id),
                consume_opts,
                FieldTable::default(),
            )
            .await
            .map_err(|e| RpcError::Transport(format!("amqp: consume failed: {e}")))?;

        log_info!("[{}] Started consuming queue: {queue}", self.transport_id);

        let handle = tokio::spawn(consume_loop(
            self.transport_id.clone(),
            queue.clone(),
            consumer,
            no_ack,
            Arc::clone(&self.subscribers),
        ));

        self.consumer_handles.insert(queue, handle);
        Ok(())
    }
}

/// Forward deliveries from one AMQP consumer to the queue's local inboxes.
async fn consume_loop(
    transport_id: String,
    queue: String,
    mut consumer: Consumer,
    no_ack: bool,
    subscribers: SubscriberMap,
) {
    // ---
    use futures_lite::stream::StreamExt;

    while let Some(delivery_result) = consumer.next().await {
        let delivery = match delivery_result {
            Ok(delivery) => delivery,
            Err(e) => {
                log_error!("[{transport_id}] Consumer error on {queue}: {e}");
                break;
            }
        };

        log_debug!("[{transport_id}] Received message on queue: {queue}");

        if !no_ack {
            if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
                log_error!("[{transport_id}] Failed to ack message: {e}");
                continue;
            }
        }

        let props = &delivery.properties;
        let envelope = Envelope {
            address: Address::from(queue.as_str()),
            payload: Bytes::from(delivery.data.clone()),
            correlation_id: props.correlation_id().as_ref().map(|s| Arc::from(s.as_str())),
            reply_to: props.reply_to().as_ref().map(|s| Address::from(s.as_str())),
            content_type: props.content_type().as_ref().map(|s| Arc::from(s.as_str())),
        };

        let senders = {
            let subs = subscribers.read().await;
            subs.get(&queue).cloned().unwrap_or_default()
        };

        if senders.is_empty() {
            log_warn!("[{transport_id}] No local subscriber for queue: {queue}");
        }

        for sender in senders {
            if let Err(e) = sender.send(envelope.clone()).await {
                log_debug!("[{transport_id}] Subscriber dropped: {e}");
            }
        }
    }

    // Closing the inboxes tells subscribers the queue is gone.
    subscribers.write().await.remove(&queue);
    log_info!("[{transport_id}] Consumer task ended for queue: {queue}");
}

#[async_trait::async_trait]
impl Transport for AmqpTransport {
    // ---
    fn base(&self) -> &TransportBase {
        &self.base
    }

    async fn publish(&self, env: Envelope) -> Result<()> {
        // ---
        let (tx, rx) = oneshot::channel();
        self.send_cmd(Cmd::Publish { env, resp: tx }, rx).await
    }

    async fn subscribe(&self, sub: Subscription) -> Result<SubscriptionHandle> {
        // ---
        let queue = sub.0.as_ref().to_string();
        let (inbox_tx, inbox_rx) = mpsc::channel(INBOX_CAPACITY);
        let (tx, rx) = oneshot::channel();

        self.send_cmd(
            Cmd::Subscribe {
                queue: queue.clone(),
                inbox: inbox_tx,
                resp: tx,
            },
            rx,
        )
        .await?;

        Ok(SubscriptionHandle {
            address: Address::from(queue),
            inbox: inbox_rx,
        })
    }

    async fn subscribe_private(&self) -> Result<SubscriptionHandle> {
        // ---
        let (inbox_tx, inbox_rx) = mpsc::channel(INBOX_CAPACITY);
        let (tx, rx) = oneshot::channel();

        let queue = self
            .send_cmd(
                Cmd::SubscribePrivate {
                    inbox: inbox_tx,
                    resp: tx,
                },
                rx,
            )
            .await?;

        Ok(SubscriptionHandle {
            address: Address::from(queue),
            inbox: inbox_rx,
        })
    }

    async fn close(&self) -> Result<()> {
        // ---
        let (tx, rx) = oneshot::channel();

        let _ = self.cmd_tx.send(Cmd::Close { resp: tx }).await;
        let _ = rx.await;

        if let Some(handle) = self.actor.lock().await.take() {
            let _ = handle.await;
        }

        Ok(())
    }
}

/// Creates a lapin-based AMQP transport from the given configuration.
///
/// # Errors
///
/// Returns an error if connecting to the broker or opening a channel fails.
///
/// # Connection Behavior
///
/// The connection to the broker happens immediately during transport creation.
pub async fn create_transport(config: TransportConfig) -> Result<TransportPtr> {
    // ---
    let (connection, channel) = create_amqp_connection(&config).await?;
    Ok(AmqpTransport::create(&config, connection, channel))
}

/// Creates an AMQP connection and channel from the given configuration.
async fn create_amqp_connection(config: &TransportConfig) -> Result<(Connection, Channel)> {
    // ---
    let uri = config.uri.as_str();

    log_info!("[{}] Connecting to AMQP broker: {uri}", config.node_id);

    let connection = Connection::connect(uri, ConnectionProperties::default())
        .await
        .map_err(|e| {
            let msg = format!("amqp: connection to {uri} failed: {e}");
            log_error!("{msg}");
            RpcError::Transport(msg)
        })?;

    log_info!("[{}] Connected to AMQP broker", config.node_id);

    let channel = connection.create_channel().await.map_err(|e| {
        let msg = format!("amqp: channel creation failed: {e}");
        log_error!("{msg}");
        RpcError::Transport(msg)
    })?;

    log_debug!("[{}] Created AMQP channel", config.node_id);

    Ok((connection, channel))
}
