//! In-process broker.
//!
//! [`MemoryBroker`] keeps every exchange, queue, and in-flight delivery in
//! one shared state behind an async mutex. It behaves like a single AMQP
//! node for the parts Peril uses:
//!
//! - exchanges are declared by the broker's owner, never by clients;
//! - queues are declared and bound through channels, with durable,
//!   auto-delete, and exclusive flags enforced;
//! - consumers get pushed deliveries round-robin and must settle each one;
//! - `nack(requeue = false)` routes the message to the queue's
//!   `x-dead-letter-exchange`, or drops it when there is none;
//! - closing a channel returns its unacknowledged deliveries to their
//!   queues and ends its consumers' streams at once, including deliveries
//!   still buffered in them; closing a connection also removes its
//!   exclusive queues.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::{Mutex, mpsc};

use crate::{
    ARG_DEAD_LETTER_EXCHANGE, BrokerError, Channel, ChannelId, Connection, Delivery,
    ExchangeKind, FieldTable, FieldValue, Properties, QueueInfo, QueueOptions,
};

type Shared = Arc<Mutex<BrokerState>>;

// ---------------------------------------------------------------------------
// Inspection types
// ---------------------------------------------------------------------------

/// How a delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    Nack { requeue: bool },
}

/// One entry in the broker's settlement log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckRecord {
    pub queue: String,
    pub delivery_tag: u64,
    pub disposition: Disposition,
}

/// Point-in-time view of a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSnapshot {
    pub name: String,
    pub options: QueueOptions,
    pub arguments: FieldTable,
    /// `(exchange, binding_key)` pairs.
    pub bindings: Vec<(String, String)>,
    /// Messages waiting for a consumer.
    pub ready: usize,
    /// Messages handed to a consumer and not yet settled.
    pub unacked: usize,
    pub consumers: usize,
}

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Message {
    exchange: String,
    routing_key: String,
    properties: Properties,
    body: Vec<u8>,
    redelivered: bool,
}

struct ConsumerSlot {
    tag: String,
    channel: u64,
    sender: mpsc::UnboundedSender<MemoryDelivery>,
    /// Shared with the [`MemoryConsumer`]; set when the channel closes.
    closed: Arc<AtomicBool>,
}

struct QueueState {
    options: QueueOptions,
    arguments: FieldTable,
    owner: Option<u64>,
    bindings: Vec<(String, String)>,
    ready: VecDeque<Message>,
    consumers: Vec<ConsumerSlot>,
    next_consumer: usize,
    had_consumer: bool,
}

struct ChannelState {
    connection: u64,
    /// delivery tag -> (queue, message)
    unacked: HashMap<u64, (String, Message)>,
}

#[derive(Default)]
struct BrokerState {
    exchanges: HashMap<String, ExchangeKind>,
    queues: HashMap<String, QueueState>,
    channels: HashMap<u64, ChannelState>,
    open_connections: HashSet<u64>,
    ack_log: Vec<AckRecord>,
    next_connection: u64,
    next_channel: u64,
    next_delivery_tag: u64,
    next_generated: u64,
}

impl BrokerState {
    fn check_channel(&self, channel: u64) -> Result<u64, BrokerError> {
        let state = self
            .channels
            .get(&channel)
            .ok_or(BrokerError::ChannelClosed(channel))?;
        Ok(state.connection)
    }

    fn check_access(&self, queue: &str, connection: u64) -> Result<(), BrokerError> {
        let q = self
            .queues
            .get(queue)
            .ok_or_else(|| BrokerError::NotFound(format!("queue '{queue}'")))?;
        match q.owner {
            Some(owner) if owner != connection => Err(BrokerError::ResourceLocked(format!(
                "queue '{queue}' is exclusive to another connection"
            ))),
            _ => Ok(()),
        }
    }

    /// Copies `message` into every queue bound to `exchange` whose binding
    /// matches `routing_key`. Returns the queues that received it.
    fn route(
        &mut self,
        exchange: &str,
        routing_key: &str,
        message: Message,
    ) -> Result<Vec<String>, BrokerError> {
        let kind = *self
            .exchanges
            .get(exchange)
            .ok_or_else(|| BrokerError::NotFound(format!("exchange '{exchange}'")))?;

        let mut targets = Vec::new();
        for (name, queue) in &mut self.queues {
            let bound = queue
                .bindings
                .iter()
                .any(|(ex, key)| ex == exchange && kind.routes(key, routing_key));
            if bound {
                queue.ready.push_back(message.clone());
                targets.push(name.clone());
            }
        }
        if targets.is_empty() {
            tracing::trace!(exchange, routing_key, "message unroutable, dropped");
        }
        Ok(targets)
    }

    /// Pushes ready messages to consumers until one side runs out.
    fn dispatch(&mut self, shared: &Shared, queue_name: &str) {
        loop {
            let Some(queue) = self.queues.get_mut(queue_name) else {
                return;
            };
            if queue.consumers.is_empty() {
                return;
            }
            let Some(message) = queue.ready.pop_front() else {
                return;
            };

            let index = queue.next_consumer % queue.consumers.len();
            queue.next_consumer = index + 1;
            let channel = queue.consumers[index].channel;

            self.next_delivery_tag += 1;
            let tag = self.next_delivery_tag;
            let delivery = MemoryDelivery {
                shared: Arc::clone(shared),
                channel,
                tag,
                message: message.clone(),
            };

            if queue.consumers[index].sender.send(delivery).is_err() {
                // Consumer stream was dropped; forget it and retry.
                let dead = queue.consumers.remove(index);
                tracing::debug!(queue = queue_name, consumer = %dead.tag, "removed dead consumer");
                queue.ready.push_front(message);
                continue;
            }
            if let Some(ch) = self.channels.get_mut(&channel) {
                ch.unacked.insert(tag, (queue_name.to_string(), message));
            }
        }
    }

    fn requeue(&mut self, queue_name: &str, mut message: Message) {
        if let Some(queue) = self.queues.get_mut(queue_name) {
            message.redelivered = true;
            queue.ready.push_front(message);
        }
    }

    /// Routes a rejected message to the queue's dead-letter exchange.
    fn dead_letter(&mut self, shared: &Shared, queue_name: &str, mut message: Message) {
        let dlx = self
            .queues
            .get(queue_name)
            .and_then(|q| match q.arguments.get(ARG_DEAD_LETTER_EXCHANGE) {
                Some(FieldValue::Str(name)) => Some(name.clone()),
                _ => None,
            });
        let Some(dlx) = dlx else {
            tracing::debug!(queue = queue_name, "rejected message dropped (no dead-letter exchange)");
            return;
        };

        message.redelivered = false;
        let routing_key = message.routing_key.clone();
        match self.route(&dlx, &routing_key, message) {
            Ok(targets) => {
                tracing::debug!(queue = queue_name, dlx = %dlx, "message dead-lettered");
                for target in targets {
                    self.dispatch(shared, &target);
                }
            }
            Err(e) => {
                tracing::warn!(queue = queue_name, dlx = %dlx, error = %e, "dead-letter routing failed");
            }
        }
    }

    fn settle(
        &mut self,
        shared: &Shared,
        channel: u64,
        tag: u64,
        disposition: Disposition,
    ) -> Result<(), BrokerError> {
        let ch = self
            .channels
            .get_mut(&channel)
            .ok_or(BrokerError::ChannelClosed(channel))?;
        let (queue, message) = ch.unacked.remove(&tag).ok_or_else(|| {
            BrokerError::PreconditionFailed(format!("unknown delivery tag {tag}"))
        })?;

        self.ack_log.push(AckRecord {
            queue: queue.clone(),
            delivery_tag: tag,
            disposition,
        });

        match disposition {
            Disposition::Ack => {}
            Disposition::Nack { requeue: true } => {
                self.requeue(&queue, message);
                self.dispatch(shared, &queue);
            }
            Disposition::Nack { requeue: false } => {
                self.dead_letter(shared, &queue, message);
            }
        }
        Ok(())
    }

    fn close_channel(&mut self, shared: &Shared, channel: u64) {
        let Some(state) = self.channels.remove(&channel) else {
            return;
        };

        let mut returned: Vec<(u64, (String, Message))> = state.unacked.into_iter().collect();
        // Push back newest first so the oldest ends up at the head.
        returned.sort_by_key(|(tag, _)| std::cmp::Reverse(*tag));
        let mut touched: Vec<String> = Vec::new();
        for (_, (queue, message)) in returned {
            self.requeue(&queue, message);
            if !touched.contains(&queue) {
                touched.push(queue);
            }
        }

        let mut emptied = Vec::new();
        for (name, queue) in &mut self.queues {
            let before = queue.consumers.len();
            queue.consumers.retain(|slot| {
                if slot.channel == channel {
                    slot.closed.store(true, Ordering::Release);
                    false
                } else {
                    true
                }
            });
            if queue.consumers.len() != before {
                if queue.options.auto_delete && queue.had_consumer && queue.consumers.is_empty() {
                    emptied.push(name.clone());
                } else if !touched.contains(name) {
                    touched.push(name.clone());
                }
            }
        }
        for name in emptied {
            tracing::debug!(queue = %name, "auto-delete queue removed");
            self.queues.remove(&name);
        }
        for name in touched {
            self.dispatch(shared, &name);
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryBroker
// ---------------------------------------------------------------------------

/// An in-process message broker.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    shared: Shared,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares an exchange. Declaring an existing name with the same kind
    /// is a no-op.
    pub async fn declare_exchange(&self, name: &str, kind: ExchangeKind) -> Result<(), BrokerError> {
        let mut state = self.shared.lock().await;
        match state.exchanges.get(name) {
            Some(existing) if *existing != kind => Err(BrokerError::PreconditionFailed(format!(
                "exchange '{name}' already declared as {existing}"
            ))),
            Some(_) => Ok(()),
            None => {
                state.exchanges.insert(name.to_string(), kind);
                tracing::debug!(exchange = name, %kind, "exchange declared");
                Ok(())
            }
        }
    }

    /// Opens a new connection.
    pub async fn connect(&self) -> MemoryConnection {
        let mut state = self.shared.lock().await;
        state.next_connection += 1;
        let id = state.next_connection;
        state.open_connections.insert(id);
        tracing::debug!(connection = id, "connection opened");
        MemoryConnection {
            shared: Arc::clone(&self.shared),
            id,
        }
    }

    /// Returns a snapshot of a queue, or `None` if it doesn't exist.
    pub async fn queue(&self, name: &str) -> Option<QueueSnapshot> {
        let state = self.shared.lock().await;
        let queue = state.queues.get(name)?;
        let unacked = state
            .channels
            .values()
            .flat_map(|ch| ch.unacked.values())
            .filter(|(q, _)| q == name)
            .count();
        Some(QueueSnapshot {
            name: name.to_string(),
            options: queue.options,
            arguments: queue.arguments.clone(),
            bindings: queue.bindings.clone(),
            ready: queue.ready.len(),
            unacked,
            consumers: queue.consumers.len(),
        })
    }

    /// Every ack and nack the broker has processed, in order.
    pub async fn ack_log(&self) -> Vec<AckRecord> {
        self.shared.lock().await.ack_log.clone()
    }

    /// Closes every channel with a consumer on `queue`, the way a broker
    /// does on a channel-level error. Returns how many channels closed.
    pub async fn close_consumers(&self, queue: &str) -> usize {
        let mut state = self.shared.lock().await;
        let mut channels: Vec<u64> = state
            .queues
            .get(queue)
            .map(|q| q.consumers.iter().map(|slot| slot.channel).collect())
            .unwrap_or_default();
        channels.sort_unstable();
        channels.dedup();
        for &channel in &channels {
            state.close_channel(&self.shared, channel);
        }
        tracing::debug!(queue, closed = channels.len(), "consumer channels force-closed");
        channels.len()
    }

    /// Removes and returns the bodies of all ready messages in a queue.
    pub async fn drain(&self, queue: &str) -> Vec<Vec<u8>> {
        let mut state = self.shared.lock().await;
        state
            .queues
            .get_mut(queue)
            .map(|q| q.ready.drain(..).map(|m| m.body).collect())
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// MemoryConnection
// ---------------------------------------------------------------------------

/// A connection to a [`MemoryBroker`]. Clones share the same connection.
#[derive(Clone)]
pub struct MemoryConnection {
    shared: Shared,
    id: u64,
}

impl MemoryConnection {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Closes the connection, every channel on it, and its exclusive
    /// queues.
    pub async fn close(&self) {
        let mut state = self.shared.lock().await;
        if !state.open_connections.remove(&self.id) {
            return;
        }
        let channels: Vec<u64> = state
            .channels
            .iter()
            .filter(|(_, ch)| ch.connection == self.id)
            .map(|(id, _)| *id)
            .collect();
        for channel in channels {
            state.close_channel(&self.shared, channel);
        }
        state.queues.retain(|_, q| q.owner != Some(self.id));
        tracing::debug!(connection = self.id, "connection closed");
    }
}

impl Connection for MemoryConnection {
    type Channel = MemoryChannel;

    async fn create_channel(&self) -> Result<MemoryChannel, BrokerError> {
        let mut state = self.shared.lock().await;
        if !state.open_connections.contains(&self.id) {
            return Err(BrokerError::ConnectionClosed);
        }
        state.next_channel += 1;
        let id = state.next_channel;
        state.channels.insert(
            id,
            ChannelState {
                connection: self.id,
                unacked: HashMap::new(),
            },
        );
        Ok(MemoryChannel {
            shared: Arc::clone(&self.shared),
            id,
        })
    }
}

// ---------------------------------------------------------------------------
// MemoryChannel
// ---------------------------------------------------------------------------

/// A channel on a [`MemoryConnection`].
pub struct MemoryChannel {
    shared: Shared,
    id: u64,
}

impl Channel for MemoryChannel {
    type Delivery = MemoryDelivery;
    type Consumer = MemoryConsumer;

    fn id(&self) -> ChannelId {
        ChannelId::new(self.id)
    }

    async fn queue_declare(
        &self,
        queue: &str,
        options: QueueOptions,
        arguments: FieldTable,
    ) -> Result<QueueInfo, BrokerError> {
        let mut state = self.shared.lock().await;
        let connection = state.check_channel(self.id)?;

        let name = if queue.is_empty() {
            state.next_generated += 1;
            format!("amq.gen-{}", state.next_generated)
        } else {
            queue.to_string()
        };

        if let Some(existing) = state.queues.get(&name) {
            state.check_access(&name, connection)?;
            if existing.options != options {
                return Err(BrokerError::PreconditionFailed(format!(
                    "inequivalent flags for queue '{name}': declared {:?}, requested {options:?}",
                    existing.options
                )));
            }
            if existing.arguments != arguments {
                return Err(BrokerError::PreconditionFailed(format!(
                    "inequivalent arguments for queue '{name}'"
                )));
            }
            return Ok(QueueInfo {
                message_count: existing.ready.len() as u32,
                consumer_count: existing.consumers.len() as u32,
                name,
            });
        }

        state.queues.insert(
            name.clone(),
            QueueState {
                options,
                arguments,
                owner: options.exclusive.then_some(connection),
                bindings: Vec::new(),
                ready: VecDeque::new(),
                consumers: Vec::new(),
                next_consumer: 0,
                had_consumer: false,
            },
        );
        tracing::debug!(queue = %name, ?options, "queue declared");
        Ok(QueueInfo {
            name,
            message_count: 0,
            consumer_count: 0,
        })
    }

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        binding_key: &str,
    ) -> Result<(), BrokerError> {
        let mut state = self.shared.lock().await;
        let connection = state.check_channel(self.id)?;
        state.check_access(queue, connection)?;
        if !state.exchanges.contains_key(exchange) {
            return Err(BrokerError::NotFound(format!("exchange '{exchange}'")));
        }
        if let Some(q) = state.queues.get_mut(queue) {
            let binding = (exchange.to_string(), binding_key.to_string());
            if !q.bindings.contains(&binding) {
                q.bindings.push(binding);
            }
        }
        Ok(())
    }

    async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
    ) -> Result<MemoryConsumer, BrokerError> {
        let mut state = self.shared.lock().await;
        let connection = state.check_channel(self.id)?;
        state.check_access(queue, connection)?;

        let tag = if consumer_tag.is_empty() {
            state.next_generated += 1;
            format!("ctag-{}", state.next_generated)
        } else {
            consumer_tag.to_string()
        };

        let (sender, receiver) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        if let Some(q) = state.queues.get_mut(queue) {
            q.consumers.push(ConsumerSlot {
                tag: tag.clone(),
                channel: self.id,
                sender,
                closed: Arc::clone(&closed),
            });
            q.had_consumer = true;
        }
        tracing::debug!(queue, consumer = %tag, channel = self.id, "consumer started");
        state.dispatch(&self.shared, queue);

        Ok(MemoryConsumer {
            tag,
            receiver,
            closed,
        })
    }

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        properties: Properties,
        body: Vec<u8>,
    ) -> Result<(), BrokerError> {
        let mut state = self.shared.lock().await;
        state.check_channel(self.id)?;
        let message = Message {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            properties,
            body,
            redelivered: false,
        };
        let targets = state.route(exchange, routing_key, message)?;
        for target in targets {
            state.dispatch(&self.shared, &target);
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        let mut state = self.shared.lock().await;
        state.check_channel(self.id)?;
        state.close_channel(&self.shared, self.id);
        tracing::debug!(channel = self.id, "channel closed");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryConsumer / MemoryDelivery
// ---------------------------------------------------------------------------

/// Stream of deliveries for one consumer.
///
/// Ends as soon as its channel closes. Deliveries still buffered at that
/// point were already returned to the queue, so they are dropped here
/// rather than handed out on a channel that can no longer settle them.
#[derive(Debug)]
pub struct MemoryConsumer {
    tag: String,
    receiver: mpsc::UnboundedReceiver<MemoryDelivery>,
    closed: Arc<AtomicBool>,
}

impl MemoryConsumer {
    pub fn tag(&self) -> &str {
        &self.tag
    }
}

impl fmt::Debug for MemoryBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBroker").finish_non_exhaustive()
    }
}

impl fmt::Debug for MemoryConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryConnection").field("id", &self.id).finish()
    }
}

impl fmt::Debug for MemoryChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryChannel").field("id", &self.id).finish()
    }
}

impl Stream for MemoryConsumer {
    type Item = MemoryDelivery;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.closed.load(Ordering::Acquire) {
            self.receiver.close();
            return Poll::Ready(None);
        }
        self.receiver.poll_recv(cx)
    }
}

/// A message pushed to a [`MemoryConsumer`].
pub struct MemoryDelivery {
    shared: Shared,
    channel: u64,
    tag: u64,
    message: Message,
}

impl fmt::Debug for MemoryDelivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryDelivery")
            .field("channel", &self.channel)
            .field("tag", &self.tag)
            .field("routing_key", &self.message.routing_key)
            .field("redelivered", &self.message.redelivered)
            .finish()
    }
}

impl Delivery for MemoryDelivery {
    fn delivery_tag(&self) -> u64 {
        self.tag
    }

    fn body(&self) -> &[u8] {
        &self.message.body
    }

    fn properties(&self) -> &Properties {
        &self.message.properties
    }

    fn exchange(&self) -> &str {
        &self.message.exchange
    }

    fn routing_key(&self) -> &str {
        &self.message.routing_key
    }

    fn redelivered(&self) -> bool {
        self.message.redelivered
    }

    async fn ack(self) -> Result<(), BrokerError> {
        let mut state = self.shared.lock().await;
        state.settle(&self.shared, self.channel, self.tag, Disposition::Ack)
    }

    async fn nack(self, requeue: bool) -> Result<(), BrokerError> {
        let mut state = self.shared.lock().await;
        state.settle(&self.shared, self.channel, self.tag, Disposition::Nack { requeue })
    }
}
