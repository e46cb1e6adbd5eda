//! Typed subscriptions.
//!
//! A subscription declares its queue, starts a manual-ack consumer and
//! hands each decoded message to a [`Handler`] on a dedicated tokio task.
//! The handler's [`AckType`] becomes exactly one ack or nack.
//!
//! ```text
//!   Subscription::start ──► declare_and_bind ──► basic_consume
//!                                   │
//!                           tokio::spawn(worker)
//!                                   │
//!   ┌──────────────── loop ─────────┴──────────────────────┐
//!   │ select! { cancel => exit, delivery => decode }       │
//!   │ decode ok  → handler.handle(msg).await → settle      │
//!   │ handler panicked → NackDiscard                       │
//!   │ decode err → DecodeFailure policy                    │
//!   └───────────────────────────────────────────────────────┘
//!   stream ended → close channel → resubscribe (optional)
//! ```

use std::any::Any;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;

use futures_util::{FutureExt, StreamExt};
use peril_broker::{Channel, Connection, Delivery};
use peril_protocol::{BincodeCodec, Codec, JsonCodec};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::ack::AckType;
use crate::error::PubSubError;
use crate::resubscribe::ResubscribeConfig;
use crate::topology::{QueuePolicy, close_quietly, declare_and_bind};

type ConsumerOf<C> = <<C as Connection>::Channel as Channel>::Consumer;
type DeliveryOf<C> = <<C as Connection>::Channel as Channel>::Delivery;

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

/// Processes one decoded message and decides its fate.
///
/// Implemented for every `FnMut(T) -> impl Future<Output = AckType>`
/// closure, so most callers never name this trait.
///
/// A handler that panics does not take the subscription down: the
/// delivery is discarded (dead-lettered) and the next one is handled as
/// usual.
pub trait Handler<T>: Send + 'static {
    fn handle(&mut self, message: T) -> impl Future<Output = AckType> + Send;
}

impl<T, F, Fut> Handler<T> for F
where
    F: FnMut(T) -> Fut + Send + 'static,
    Fut: Future<Output = AckType> + Send,
{
    fn handle(&mut self, message: T) -> impl Future<Output = AckType> + Send {
        self(message)
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// What to do with a delivery whose body does not decode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecodeFailure {
    /// Nack without requeue, so the broker dead-letters it.
    #[default]
    Discard,
    /// Neither ack nor nack. The message stays unacknowledged until the
    /// channel closes, then returns to the queue.
    Leave,
}

/// A subscription that has not been started yet.
#[derive(Debug, Clone)]
pub struct Subscription {
    exchange: String,
    queue: String,
    routing_key: String,
    policy: QueuePolicy,
    consumer_tag: String,
    decode_failure: DecodeFailure,
    resubscribe: Option<ResubscribeConfig>,
}

impl Subscription {
    pub fn new(
        exchange: impl Into<String>,
        queue: impl Into<String>,
        routing_key: impl Into<String>,
        policy: QueuePolicy,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            queue: queue.into(),
            routing_key: routing_key.into(),
            policy,
            consumer_tag: String::new(),
            decode_failure: DecodeFailure::default(),
            resubscribe: None,
        }
    }

    pub fn decode_failure(mut self, policy: DecodeFailure) -> Self {
        self.decode_failure = policy;
        self
    }

    /// Recover from a lost delivery stream. Ignored unless
    /// `config.enabled` is set.
    pub fn resubscribe(mut self, config: ResubscribeConfig) -> Self {
        self.resubscribe = config.enabled.then(|| config.validated());
        self
    }

    /// Consumer tag to register with. Empty (the default) lets the broker
    /// pick one.
    pub fn consumer_tag(mut self, tag: impl Into<String>) -> Self {
        self.consumer_tag = tag.into();
        self
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Declares the topology, starts consuming and spawns the consumption
    /// task.
    ///
    /// Returns once the consumer is registered; messages are processed in
    /// the background. Setup errors are returned here and nothing is
    /// spawned.
    pub async fn start<C, K, T, H>(
        self,
        conn: &C,
        codec: K,
        handler: H,
    ) -> Result<SubscriptionHandle, PubSubError>
    where
        C: Connection + Clone,
        K: Codec,
        T: DeserializeOwned + Send + 'static,
        H: Handler<T>,
    {
        let (channel, consumer) = open(conn, &self).await?;
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let queue = self.queue.clone();

        info!(
            queue = %queue,
            exchange = %self.exchange,
            routing_key = %self.routing_key,
            content_type = codec.content_type(),
            "subscription started"
        );

        let worker = Worker {
            conn: conn.clone(),
            subscription: self,
            codec,
            handler,
            cancel: cancel_rx,
            _message: PhantomData,
        };
        let task = tokio::spawn(worker.run(channel, consumer));

        Ok(SubscriptionHandle {
            queue,
            cancel: cancel_tx,
            task,
        })
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Controls a running subscription.
///
/// Dropping the handle detaches the task: it keeps consuming until its
/// stream ends.
#[derive(Debug)]
pub struct SubscriptionHandle {
    queue: String,
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Asks the task to stop. A handler that is already running finishes
    /// and its decision is still applied.
    pub fn cancel(&self) {
        // Err only if the task already exited.
        let _ = self.cancel.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancels and waits for the task to exit. Its channel is closed by
    /// then, so unacknowledged deliveries are back on the queue.
    pub async fn shutdown(self) {
        self.cancel();
        if let Err(e) = self.task.await {
            error!(queue = %self.queue, error = %e, "subscription task failed");
        }
    }
}

// ---------------------------------------------------------------------------
// Convenience
// ---------------------------------------------------------------------------

/// Starts a subscription with default settings. See [`Subscription`] for
/// decode-failure and resubscribe options.
pub async fn subscribe<C, K, T, H>(
    conn: &C,
    exchange: &str,
    queue: &str,
    routing_key: &str,
    policy: QueuePolicy,
    codec: K,
    handler: H,
) -> Result<SubscriptionHandle, PubSubError>
where
    C: Connection + Clone,
    K: Codec,
    T: DeserializeOwned + Send + 'static,
    H: Handler<T>,
{
    Subscription::new(exchange, queue, routing_key, policy)
        .start(conn, codec, handler)
        .await
}

/// [`subscribe`] with [`JsonCodec`].
pub async fn subscribe_json<C, T, H>(
    conn: &C,
    exchange: &str,
    queue: &str,
    routing_key: &str,
    policy: QueuePolicy,
    handler: H,
) -> Result<SubscriptionHandle, PubSubError>
where
    C: Connection + Clone,
    T: DeserializeOwned + Send + 'static,
    H: Handler<T>,
{
    subscribe(conn, exchange, queue, routing_key, policy, JsonCodec, handler).await
}

/// [`subscribe`] with [`BincodeCodec`].
pub async fn subscribe_bincode<C, T, H>(
    conn: &C,
    exchange: &str,
    queue: &str,
    routing_key: &str,
    policy: QueuePolicy,
    handler: H,
) -> Result<SubscriptionHandle, PubSubError>
where
    C: Connection + Clone,
    T: DeserializeOwned + Send + 'static,
    H: Handler<T>,
{
    subscribe(conn, exchange, queue, routing_key, policy, BincodeCodec, handler).await
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

async fn open<C: Connection>(
    conn: &C,
    subscription: &Subscription,
) -> Result<(C::Channel, ConsumerOf<C>), PubSubError> {
    let (channel, info) = declare_and_bind(
        conn,
        &subscription.exchange,
        &subscription.queue,
        &subscription.routing_key,
        subscription.policy,
    )
    .await?;

    match channel.basic_consume(&info.name, &subscription.consumer_tag).await {
        Ok(consumer) => Ok((channel, consumer)),
        Err(source) => {
            close_quietly(&channel).await;
            Err(PubSubError::Consume {
                queue: info.name,
                source,
            })
        }
    }
}

/// Resolves once cancellation is requested. If the handle was dropped
/// without cancelling, never resolves.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    let sender_dropped = cancel.wait_for(|stop| *stop).await.is_err();
    if sender_dropped {
        std::future::pending::<()>().await;
    }
}

async fn reject_undecodable<D: Delivery>(subscription: &Subscription, delivery: D) {
    match subscription.decode_failure {
        DecodeFailure::Leave => {}
        DecodeFailure::Discard => {
            let tag = delivery.delivery_tag();
            if let Err(e) = AckType::NackDiscard.settle(delivery).await {
                error!(queue = %subscription.queue, delivery_tag = tag, error = %e, "could not discard undecodable message");
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

enum Exit {
    Cancelled,
    StreamEnded,
}

struct Worker<C, K, T, H> {
    conn: C,
    subscription: Subscription,
    codec: K,
    handler: H,
    cancel: watch::Receiver<bool>,
    _message: PhantomData<fn() -> T>,
}

impl<C, K, T, H> Worker<C, K, T, H>
where
    C: Connection + Clone,
    K: Codec,
    T: DeserializeOwned + Send + 'static,
    H: Handler<T>,
{
    async fn run(mut self, mut channel: C::Channel, mut consumer: ConsumerOf<C>) {
        loop {
            let exit = self.consume(&mut consumer).await;
            close_quietly(&channel).await;

            if let Exit::Cancelled = exit {
                break;
            }
            let Some(config) = self.subscription.resubscribe.clone() else {
                info!(queue = %self.subscription.queue, "delivery stream ended");
                break;
            };
            match self.reopen(&config).await {
                Some((next_channel, next_consumer)) => {
                    channel = next_channel;
                    consumer = next_consumer;
                }
                None => break,
            }
        }
        info!(queue = %self.subscription.queue, "subscription stopped");
    }

    async fn consume(&mut self, consumer: &mut ConsumerOf<C>) -> Exit {
        loop {
            let delivery = tokio::select! {
                biased;
                () = cancelled(&mut self.cancel) => return Exit::Cancelled,
                next = consumer.next() => match next {
                    Some(delivery) => delivery,
                    None => return Exit::StreamEnded,
                },
            };
            self.process(delivery).await;
        }
    }

    async fn process(&mut self, delivery: DeliveryOf<C>) {
        let tag = delivery.delivery_tag();
        let message: T = match self.codec.decode(delivery.body()) {
            Ok(message) => message,
            Err(e) => {
                error!(
                    queue = %self.subscription.queue,
                    delivery_tag = tag,
                    routing_key = delivery.routing_key(),
                    error = %e,
                    "could not decode message"
                );
                reject_undecodable(&self.subscription, delivery).await;
                return;
            }
        };

        let decision = match AssertUnwindSafe(self.handler.handle(message))
            .catch_unwind()
            .await
        {
            Ok(decision) => decision,
            Err(payload) => {
                error!(
                    queue = %self.subscription.queue,
                    delivery_tag = tag,
                    panic = panic_message(payload.as_ref()),
                    "handler panicked, discarding message"
                );
                AckType::NackDiscard
            }
        };
        debug!(queue = %self.subscription.queue, delivery_tag = tag, %decision, "handler decided");
        if let Err(e) = decision.settle(delivery).await {
            error!(
                queue = %self.subscription.queue,
                delivery_tag = tag,
                %decision,
                error = %e,
                "could not settle delivery"
            );
        }
    }

    async fn reopen(
        &mut self,
        config: &ResubscribeConfig,
    ) -> Option<(C::Channel, ConsumerOf<C>)> {
        let mut attempt = 0u32;
        loop {
            attempt = attempt.saturating_add(1);
            if config.exhausted(attempt) {
                error!(queue = %self.subscription.queue, attempts = attempt - 1, "giving up on resubscribe");
                return None;
            }

            let delay = config.delay(attempt);
            warn!(
                queue = %self.subscription.queue,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "delivery stream lost, resubscribing"
            );
            tokio::select! {
                biased;
                () = cancelled(&mut self.cancel) => return None,
                () = tokio::time::sleep(delay) => {}
            }

            match open(&self.conn, &self.subscription).await {
                Ok(opened) => {
                    info!(queue = %self.subscription.queue, attempt, "resubscribed");
                    return Some(opened);
                }
                Err(e) => warn!(queue = %self.subscription.queue, attempt, error = %e, "resubscribe failed"),
            }
        }
    }
}
