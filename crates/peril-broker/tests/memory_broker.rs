//! Integration tests for the in-process broker.
//!
//! These drive the broker only through the public traits, the same way
//! the pub/sub layer does, and check the queue state through snapshots.

#![cfg(feature = "memory")]

use std::time::Duration;

use futures_util::StreamExt;
use peril_broker::{
    ARG_DEAD_LETTER_EXCHANGE, BrokerError, Channel, Connection, Delivery, Disposition,
    ExchangeKind, FieldTable, MemoryBroker, MemoryConsumer, Properties, QueueOptions,
};
use tokio::time::timeout;

// =========================================================================
// Helpers
// =========================================================================

const TOPIC: &str = "peril_topic";
const DIRECT: &str = "peril_direct";
const DLX: &str = "peril_dlx";

const DURABLE: QueueOptions = QueueOptions {
    durable: true,
    auto_delete: false,
    exclusive: false,
};

const TRANSIENT: QueueOptions = QueueOptions {
    durable: false,
    auto_delete: true,
    exclusive: true,
};

async fn broker() -> MemoryBroker {
    let broker = MemoryBroker::new();
    broker.declare_exchange(TOPIC, ExchangeKind::Topic).await.unwrap();
    broker.declare_exchange(DIRECT, ExchangeKind::Direct).await.unwrap();
    broker.declare_exchange(DLX, ExchangeKind::Fanout).await.unwrap();
    broker
}

fn dlx_args() -> FieldTable {
    let mut args = FieldTable::new();
    args.insert(ARG_DEAD_LETTER_EXCHANGE.to_string(), DLX.into());
    args
}

async fn publish<C: Channel>(ch: &C, exchange: &str, key: &str, body: &[u8]) {
    ch.basic_publish(exchange, key, Properties::default(), body.to_vec())
        .await
        .expect("publish should succeed");
}

async fn next(consumer: &mut MemoryConsumer) -> peril_broker::MemoryDelivery {
    timeout(Duration::from_secs(1), consumer.next())
        .await
        .expect("delivery should arrive")
        .expect("consumer should be open")
}

// =========================================================================
// Declaration
// =========================================================================

#[tokio::test]
async fn test_declare_is_idempotent() {
    let broker = broker().await;
    let conn = broker.connect().await;
    let ch = conn.create_channel().await.unwrap();

    let first = ch.queue_declare("game_logs", DURABLE, dlx_args()).await.unwrap();
    let second = ch.queue_declare("game_logs", DURABLE, dlx_args()).await.unwrap();
    assert_eq!(first.name, second.name);

    let snap = broker.queue("game_logs").await.unwrap();
    assert_eq!(snap.options, DURABLE);
    assert_eq!(snap.arguments, dlx_args());
}

#[tokio::test]
async fn test_redeclare_with_other_flags_fails() {
    let broker = broker().await;
    let conn = broker.connect().await;
    let ch = conn.create_channel().await.unwrap();

    ch.queue_declare("war", DURABLE, dlx_args()).await.unwrap();
    let err = ch
        .queue_declare("war", TRANSIENT, dlx_args())
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::PreconditionFailed(_)));
}

#[tokio::test]
async fn test_redeclare_with_other_arguments_fails() {
    let broker = broker().await;
    let conn = broker.connect().await;
    let ch = conn.create_channel().await.unwrap();

    ch.queue_declare("war", DURABLE, dlx_args()).await.unwrap();
    let err = ch
        .queue_declare("war", DURABLE, FieldTable::new())
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::PreconditionFailed(_)));
}

#[tokio::test]
async fn test_empty_queue_name_is_generated() {
    let broker = broker().await;
    let conn = broker.connect().await;
    let ch = conn.create_channel().await.unwrap();

    let info = ch.queue_declare("", TRANSIENT, dlx_args()).await.unwrap();
    assert!(info.name.starts_with("amq.gen-"));
}

#[tokio::test]
async fn test_exclusive_queue_is_locked_to_its_connection() {
    let broker = broker().await;
    let owner = broker.connect().await;
    let other = broker.connect().await;

    let ch = owner.create_channel().await.unwrap();
    ch.queue_declare("pause.ada", TRANSIENT, dlx_args()).await.unwrap();

    let other_ch = other.create_channel().await.unwrap();
    let err = other_ch
        .queue_declare("pause.ada", TRANSIENT, dlx_args())
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::ResourceLocked(_)));

    let err = other_ch.basic_consume("pause.ada", "").await.unwrap_err();
    assert!(matches!(err, BrokerError::ResourceLocked(_)));
}

#[tokio::test]
async fn test_bind_to_missing_exchange_fails() {
    let broker = broker().await;
    let conn = broker.connect().await;
    let ch = conn.create_channel().await.unwrap();

    ch.queue_declare("q", DURABLE, dlx_args()).await.unwrap();
    let err = ch.queue_bind("q", "nope", "#").await.unwrap_err();
    assert!(matches!(err, BrokerError::NotFound(_)));
}

#[tokio::test]
async fn test_bind_missing_queue_fails() {
    let broker = broker().await;
    let conn = broker.connect().await;
    let ch = conn.create_channel().await.unwrap();

    let err = ch.queue_bind("ghost", TOPIC, "#").await.unwrap_err();
    assert!(matches!(err, BrokerError::NotFound(_)));
}

#[tokio::test]
async fn test_declare_exchange_with_other_kind_fails() {
    let broker = broker().await;
    let err = broker
        .declare_exchange(TOPIC, ExchangeKind::Direct)
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::PreconditionFailed(_)));
}

// =========================================================================
// Routing
// =========================================================================

#[tokio::test]
async fn test_topic_wildcard_routing() {
    let broker = broker().await;
    let conn = broker.connect().await;
    let ch = conn.create_channel().await.unwrap();

    ch.queue_declare("moves", DURABLE, dlx_args()).await.unwrap();
    ch.queue_bind("moves", TOPIC, "army_moves.*").await.unwrap();

    publish(&ch, TOPIC, "army_moves.ada", b"1").await;
    publish(&ch, TOPIC, "army_moves.bob", b"2").await;
    publish(&ch, TOPIC, "war.ada", b"3").await;

    assert_eq!(broker.drain("moves").await, vec![b"1".to_vec(), b"2".to_vec()]);
}

#[tokio::test]
async fn test_direct_routing_requires_exact_key() {
    let broker = broker().await;
    let conn = broker.connect().await;
    let ch = conn.create_channel().await.unwrap();

    ch.queue_declare("pause.ada", TRANSIENT, dlx_args()).await.unwrap();
    ch.queue_bind("pause.ada", DIRECT, "pause").await.unwrap();

    publish(&ch, DIRECT, "pause", b"yes").await;
    publish(&ch, DIRECT, "pause.ada", b"no").await;

    assert_eq!(broker.drain("pause.ada").await, vec![b"yes".to_vec()]);
}

#[tokio::test]
async fn test_publish_to_missing_exchange_fails() {
    let broker = broker().await;
    let conn = broker.connect().await;
    let ch = conn.create_channel().await.unwrap();

    let err = ch
        .basic_publish("nope", "k", Properties::default(), vec![])
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::NotFound(_)));
}

#[tokio::test]
async fn test_properties_travel_with_the_message() {
    let broker = broker().await;
    let conn = broker.connect().await;
    let ch = conn.create_channel().await.unwrap();

    ch.queue_declare("q", DURABLE, dlx_args()).await.unwrap();
    ch.queue_bind("q", TOPIC, "#").await.unwrap();
    let mut consumer = ch.basic_consume("q", "").await.unwrap();

    ch.basic_publish(
        TOPIC,
        "game_logs.ada",
        Properties::with_content_type("application/json"),
        b"{}".to_vec(),
    )
    .await
    .unwrap();

    let delivery = next(&mut consumer).await;
    assert_eq!(delivery.exchange(), TOPIC);
    assert_eq!(delivery.routing_key(), "game_logs.ada");
    assert_eq!(
        delivery.properties().content_type.as_deref(),
        Some("application/json")
    );
    assert!(!delivery.redelivered());
}

// =========================================================================
// Acknowledgement
// =========================================================================

#[tokio::test]
async fn test_ack_settles_the_delivery() {
    let broker = broker().await;
    let conn = broker.connect().await;
    let ch = conn.create_channel().await.unwrap();

    ch.queue_declare("q", DURABLE, dlx_args()).await.unwrap();
    ch.queue_bind("q", TOPIC, "#").await.unwrap();
    let mut consumer = ch.basic_consume("q", "").await.unwrap();
    publish(&ch, TOPIC, "x", b"m").await;

    let delivery = next(&mut consumer).await;
    assert_eq!(broker.queue("q").await.unwrap().unacked, 1);
    let tag = delivery.delivery_tag();
    delivery.ack().await.unwrap();

    let snap = broker.queue("q").await.unwrap();
    assert_eq!((snap.ready, snap.unacked), (0, 0));
    let log = broker.ack_log().await;
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].delivery_tag, tag);
    assert_eq!(log[0].disposition, Disposition::Ack);
}

#[tokio::test]
async fn test_nack_requeue_redelivers() {
    let broker = broker().await;
    let conn = broker.connect().await;
    let ch = conn.create_channel().await.unwrap();

    ch.queue_declare("q", DURABLE, dlx_args()).await.unwrap();
    ch.queue_bind("q", TOPIC, "#").await.unwrap();
    let mut consumer = ch.basic_consume("q", "").await.unwrap();
    publish(&ch, TOPIC, "x", b"again").await;

    let first = next(&mut consumer).await;
    first.nack(true).await.unwrap();

    let second = next(&mut consumer).await;
    assert_eq!(second.body(), b"again");
    assert!(second.redelivered());
    second.ack().await.unwrap();

    let dispositions: Vec<_> = broker
        .ack_log()
        .await
        .into_iter()
        .map(|r| r.disposition)
        .collect();
    assert_eq!(
        dispositions,
        vec![Disposition::Nack { requeue: true }, Disposition::Ack]
    );
}

#[tokio::test]
async fn test_nack_discard_dead_letters() {
    let broker = broker().await;
    let conn = broker.connect().await;
    let ch = conn.create_channel().await.unwrap();

    ch.queue_declare("peril_dlq", DURABLE, FieldTable::new()).await.unwrap();
    ch.queue_bind("peril_dlq", DLX, "").await.unwrap();
    ch.queue_declare("q", DURABLE, dlx_args()).await.unwrap();
    ch.queue_bind("q", TOPIC, "#").await.unwrap();
    let mut consumer = ch.basic_consume("q", "").await.unwrap();
    publish(&ch, TOPIC, "war.ada", b"poison").await;

    next(&mut consumer).await.nack(false).await.unwrap();

    assert_eq!(broker.queue("q").await.unwrap().ready, 0);
    assert_eq!(broker.drain("peril_dlq").await, vec![b"poison".to_vec()]);
}

#[tokio::test]
async fn test_nack_discard_without_dlx_drops() {
    let broker = broker().await;
    let conn = broker.connect().await;
    let ch = conn.create_channel().await.unwrap();

    ch.queue_declare("q", DURABLE, FieldTable::new()).await.unwrap();
    ch.queue_bind("q", TOPIC, "#").await.unwrap();
    let mut consumer = ch.basic_consume("q", "").await.unwrap();
    publish(&ch, TOPIC, "x", b"gone").await;

    next(&mut consumer).await.nack(false).await.unwrap();

    let snap = broker.queue("q").await.unwrap();
    assert_eq!((snap.ready, snap.unacked), (0, 0));
}

#[tokio::test]
async fn test_ack_after_channel_close_fails() {
    let broker = broker().await;
    let conn = broker.connect().await;
    let ch = conn.create_channel().await.unwrap();

    ch.queue_declare("q", DURABLE, dlx_args()).await.unwrap();
    ch.queue_bind("q", TOPIC, "#").await.unwrap();
    let mut consumer = ch.basic_consume("q", "").await.unwrap();
    publish(&ch, TOPIC, "x", b"m").await;

    let delivery = next(&mut consumer).await;
    ch.close().await.unwrap();

    let err = delivery.ack().await.unwrap_err();
    assert!(matches!(err, BrokerError::ChannelClosed(_)));
}

// =========================================================================
// Consumers and lifetimes
// =========================================================================

#[tokio::test]
async fn test_round_robin_between_consumers() {
    let broker = broker().await;
    let conn = broker.connect().await;
    let ch_a = conn.create_channel().await.unwrap();
    let ch_b = conn.create_channel().await.unwrap();

    ch_a.queue_declare("war", DURABLE, dlx_args()).await.unwrap();
    ch_a.queue_bind("war", TOPIC, "war.*").await.unwrap();
    let mut a = ch_a.basic_consume("war", "a").await.unwrap();
    let mut b = ch_b.basic_consume("war", "b").await.unwrap();

    publish(&ch_a, TOPIC, "war.ada", b"1").await;
    publish(&ch_a, TOPIC, "war.bob", b"2").await;

    assert_eq!(next(&mut a).await.body(), b"1");
    assert_eq!(next(&mut b).await.body(), b"2");
}

#[tokio::test]
async fn test_channel_close_returns_unacked_messages() {
    let broker = broker().await;
    let conn = broker.connect().await;
    let ch = conn.create_channel().await.unwrap();

    ch.queue_declare("logs", DURABLE, dlx_args()).await.unwrap();
    ch.queue_bind("logs", TOPIC, "game_logs.*").await.unwrap();
    let mut consumer = ch.basic_consume("logs", "").await.unwrap();
    publish(&ch, TOPIC, "game_logs.ada", b"first").await;
    publish(&ch, TOPIC, "game_logs.ada", b"second").await;

    let _first = next(&mut consumer).await;
    let _second = next(&mut consumer).await;
    ch.close().await.unwrap();

    // Consumer stream ends with its channel.
    assert!(consumer.next().await.is_none());

    let snap = broker.queue("logs").await.unwrap();
    assert_eq!((snap.ready, snap.unacked, snap.consumers), (2, 0, 0));
    assert_eq!(
        broker.drain("logs").await,
        vec![b"first".to_vec(), b"second".to_vec()]
    );
}

#[tokio::test]
async fn test_auto_delete_queue_removed_with_last_consumer() {
    let broker = broker().await;
    let conn = broker.connect().await;
    let ch = conn.create_channel().await.unwrap();

    ch.queue_declare("army_moves.ada", TRANSIENT, dlx_args()).await.unwrap();
    let _consumer = ch.basic_consume("army_moves.ada", "").await.unwrap();
    assert!(broker.queue("army_moves.ada").await.is_some());

    ch.close().await.unwrap();
    assert!(broker.queue("army_moves.ada").await.is_none());
}

#[tokio::test]
async fn test_connection_close_removes_exclusive_queues() {
    let broker = broker().await;
    let conn = broker.connect().await;
    let ch = conn.create_channel().await.unwrap();

    ch.queue_declare("pause.ada", TRANSIENT, dlx_args()).await.unwrap();
    ch.queue_declare("war", DURABLE, dlx_args()).await.unwrap();
    conn.close().await;

    assert!(broker.queue("pause.ada").await.is_none());
    assert!(broker.queue("war").await.is_some());
    assert!(matches!(
        conn.create_channel().await,
        Err(BrokerError::ConnectionClosed)
    ));
    assert!(matches!(
        ch.queue_declare("x", DURABLE, dlx_args()).await,
        Err(BrokerError::ChannelClosed(_))
    ));
}

#[tokio::test]
async fn test_messages_wait_for_a_consumer() {
    let broker = broker().await;
    let conn = broker.connect().await;
    let ch = conn.create_channel().await.unwrap();

    ch.queue_declare("q", DURABLE, dlx_args()).await.unwrap();
    ch.queue_bind("q", TOPIC, "#").await.unwrap();
    publish(&ch, TOPIC, "x", b"early").await;
    assert_eq!(broker.queue("q").await.unwrap().ready, 1);

    let mut consumer = ch.basic_consume("q", "").await.unwrap();
    assert_eq!(next(&mut consumer).await.body(), b"early");
}

#[tokio::test]
async fn test_close_consumers_ends_streams_and_returns_messages() {
    let broker = broker().await;
    let conn = broker.connect().await;
    let ch = conn.create_channel().await.unwrap();

    ch.queue_declare("war", DURABLE, dlx_args()).await.unwrap();
    ch.queue_bind("war", TOPIC, "war.*").await.unwrap();
    let mut consumer = ch.basic_consume("war", "").await.unwrap();
    publish(&ch, TOPIC, "war.ada", b"w").await;
    let _held = next(&mut consumer).await;

    assert_eq!(broker.close_consumers("war").await, 1);
    assert!(consumer.next().await.is_none());

    let snapshot = broker.queue("war").await.unwrap();
    assert_eq!(snapshot.consumers, 0);
    assert_eq!(snapshot.ready, 1);
    assert_eq!(broker.close_consumers("war").await, 0);

    // The connection itself stays usable.
    assert!(conn.create_channel().await.is_ok());
}

#[tokio::test]
async fn test_channel_close_drops_buffered_deliveries() {
    let broker = broker().await;
    let conn = broker.connect().await;
    let ch = conn.create_channel().await.unwrap();

    ch.queue_declare("war", DURABLE, dlx_args()).await.unwrap();
    ch.queue_bind("war", TOPIC, "war.*").await.unwrap();
    let mut consumer = ch.basic_consume("war", "").await.unwrap();
    for body in [b"1", b"2", b"3"] {
        publish(&ch, TOPIC, "war.ada", body).await;
    }
    let held = next(&mut consumer).await;

    // "2" and "3" were pushed to the consumer but never pulled.
    ch.close().await.unwrap();
    assert!(consumer.next().await.is_none());
    assert!(matches!(held.ack().await, Err(BrokerError::ChannelClosed(_))));

    let snapshot = broker.queue("war").await.unwrap();
    assert_eq!((snapshot.ready, snapshot.unacked), (3, 0));
    assert_eq!(
        broker.drain("war").await,
        vec![b"1".to_vec(), b"2".to_vec(), b"3".to_vec()]
    );
}
