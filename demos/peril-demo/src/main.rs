//! Runs a Peril server and two clients: the server pauses and resumes
//! the game, Bob marches into Asia where Ada holds cavalry, and the
//! resulting war ends up in the server's game log.
//!
//! By default everything runs on the in-process broker. Built with
//! `--features amqp`, the three participants each open their own
//! connection to `broker_url` (RabbitMQ), exactly as separate processes
//! would.

mod territory;

use std::sync::Arc;
use std::time::Duration;

use peril::prelude::*;
use tokio::sync::{Mutex, Notify};
use tracing::{info, warn};

use crate::territory::Territory;

const EXCHANGES: [(&str, ExchangeKind); 3] = [
    (routing::EXCHANGE_PERIL_TOPIC, ExchangeKind::Topic),
    (routing::EXCHANGE_PERIL_DIRECT, ExchangeKind::Direct),
    (routing::EXCHANGE_PERIL_DLX, ExchangeKind::Fanout),
];

/// Logs each game log and wakes whoever is waiting for one.
#[derive(Default)]
struct NotifyingSink {
    written: Notify,
}

impl LogSink for NotifyingSink {
    fn write_log(&self, log: &GameLog) -> std::io::Result<()> {
        TracingLogSink.write_log(log)?;
        self.written.notify_one();
        Ok(())
    }
}

/// One connection each for the server, Ada and Bob.
#[cfg(not(feature = "amqp"))]
async fn connect(config: &PerilConfig) -> Result<[MemoryConnection; 3], PerilError> {
    info!(
        configured_broker = %config.broker_url,
        "using the in-process broker (build with --features amqp to use the configured one)"
    );
    let broker = MemoryBroker::new();
    for (name, kind) in EXCHANGES {
        broker.declare_exchange(name, kind).await?;
    }
    Ok([
        broker.connect().await,
        broker.connect().await,
        broker.connect().await,
    ])
}

#[cfg(feature = "amqp")]
async fn connect(config: &PerilConfig) -> Result<[AmqpConnection; 3], PerilError> {
    let server = AmqpConnection::connect(&config.broker_url).await?;
    for (name, kind) in EXCHANGES {
        server.declare_exchange(name, kind).await?;
    }
    Ok([
        server,
        AmqpConnection::connect(&config.broker_url).await?,
        AmqpConnection::connect(&config.broker_url).await?,
    ])
}

async fn play<C: Connection + Clone>(
    server_conn: &C,
    ada_conn: &C,
    bob_conn: &C,
    config: &PerilConfig,
) -> Result<(), PerilError> {
    let sink = Arc::new(NotifyingSink::default());
    let server = register_server(server_conn, Arc::clone(&sink), &config.subscription).await?;

    let ada = Arc::new(Mutex::new(Territory::new(
        "ada",
        &[
            (1, UnitRank::Infantry, Location::Europe),
            (2, UnitRank::Cavalry, Location::Asia),
        ],
    )));
    let bob = Arc::new(Mutex::new(Territory::new(
        "bob",
        &[(1, UnitRank::Artillery, Location::Africa)],
    )));
    let ada_client = register_client(ada_conn, Arc::clone(&ada), &config.subscription).await?;
    let bob_client = register_client(bob_conn, Arc::clone(&bob), &config.subscription).await?;

    server.publish_pause(true).await?;
    server.publish_pause(false).await?;

    let army_move = bob.lock().await.move_units(Location::Asia, &[1]);
    bob_client.publish_move(&army_move).await?;

    if tokio::time::timeout(Duration::from_secs(2), sink.written.notified())
        .await
        .is_err()
    {
        warn!("no war was logged");
    }

    let (ada_units, ada_paused) = {
        let ada = ada.lock().await;
        (ada.unit_count(), ada.is_paused())
    };
    let bob_units = bob.lock().await.unit_count();
    info!(ada_units, bob_units, ada_paused, "final state");

    ada_client.shutdown().await;
    bob_client.shutdown().await;
    server.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), PerilError> {
    let config = PerilConfig::load()?;
    peril::telemetry::init(&config.log_filter);

    let [server_conn, ada_conn, bob_conn] = connect(&config).await?;
    play(&server_conn, &ada_conn, &bob_conn, &config).await?;

    #[cfg(feature = "amqp")]
    for conn in [server_conn, ada_conn, bob_conn] {
        if let Err(e) = conn.close().await {
            warn!(error = %e, "connection did not close cleanly");
        }
    }
    Ok(())
}
