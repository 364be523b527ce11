//! Replication subscriber
//!
//! Owns the single streaming connection to the replication slot and turns
//! the WAL stream into [`ChangeEvent`]s on a bounded channel.
//!
//! ## State machine
//!
//! ```text
//! Idle → Connecting → Streaming → Recovering → Connecting → …
//! ```
//!
//! There is no terminal state: any stream failure tears the connection
//! down, waits a fixed delay, and resubscribes with the same slot and
//! publication set. The slot retains WAL since the last acknowledged
//! position, so nothing already committed is lost across reconnects.
//!
//! ## Delivery semantics
//!
//! Each row change is enqueued for the consumer and the WAL position is
//! acknowledged immediately afterwards, before the consumer necessarily
//! handles it. This is at-most-once hand-off: a crash between the
//! acknowledgment and the downstream delivery loses that event. The
//! trade-off keeps the reader from ever blocking on slow webhook
//! endpoints and keeps slot WAL retention bounded.

use crate::config::{SubscriberConfig, RECONNECT_DELAY};
use crate::error::{CdcError, Result};
use crate::event::{format_lsn, ChangeEvent};
use crate::protocol::{PgOutputMessage, RelationBody, ReplicationClient, ReplicationStream};
use bytes::Buf;
use std::collections::HashMap;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use url::Url;

/// Subscriber lifecycle state, observable via [`Subscriber::state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberState {
    Idle,
    Connecting,
    Streaming,
    Recovering,
}

/// Replication subscriber.
///
/// Create with [`Subscriber::new`], take the event receiver, then call
/// [`Subscriber::subscribe`] to spawn the streaming task.
pub struct Subscriber {
    config: SubscriberConfig,
    event_tx: Option<mpsc::Sender<ChangeEvent>>,
    event_rx: Option<mpsc::Receiver<ChangeEvent>>,
    state_tx: watch::Sender<SubscriberState>,
}

impl Subscriber {
    pub fn new(config: SubscriberConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.buffer_size);
        let (state_tx, _) = watch::channel(SubscriberState::Idle);
        Self {
            config,
            event_tx: Some(tx),
            event_rx: Some(rx),
            state_tx,
        }
    }

    /// Take the change-event receiver. Can only be taken once.
    pub fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<ChangeEvent>> {
        self.event_rx.take()
    }

    /// Watch the subscriber's lifecycle state.
    pub fn state(&self) -> watch::Receiver<SubscriberState> {
        self.state_tx.subscribe()
    }

    /// Spawn the streaming task. Runs until the event receiver is dropped.
    pub fn subscribe(&mut self) -> Result<tokio::task::JoinHandle<()>> {
        let event_tx = self
            .event_tx
            .take()
            .ok_or_else(|| CdcError::InvalidState("Subscriber already started".into()))?;

        let config = self.config.clone();
        let state_tx = self.state_tx.clone();

        info!(
            "Subscribing to slot {} with publications {:?}",
            config.slot_name, config.publication_names
        );

        Ok(tokio::spawn(run_subscription_loop(
            config, event_tx, state_tx,
        )))
    }
}

/// The reconnect loop. One task, one connection at a time: a new connect
/// only starts after the previous stream value has been dropped, so two
/// live connections can never deliver duplicate events.
async fn run_subscription_loop(
    config: SubscriberConfig,
    event_tx: mpsc::Sender<ChangeEvent>,
    state_tx: watch::Sender<SubscriberState>,
) {
    loop {
        state_tx.send_replace(SubscriberState::Connecting);

        match open_stream(&config).await {
            Ok(stream) => {
                state_tx.send_replace(SubscriberState::Streaming);
                info!(
                    "Streaming from slot {} ({})",
                    config.slot_name,
                    config.publication_names.join(",")
                );

                match stream_changes(stream, &event_tx).await {
                    Ok(()) => {
                        info!("Change consumer dropped; stopping subscription");
                        break;
                    }
                    Err(e) if e.is_transient() => {
                        warn!("Replication stream interrupted: {}", e);
                    }
                    Err(e) => {
                        error!("Replication stream failed: {}", e);
                    }
                }
            }
            Err(e) => {
                warn!(
                    "Could not open replication stream on slot {}: {}",
                    config.slot_name, e
                );
            }
        }

        state_tx.send_replace(SubscriberState::Recovering);
        sleep(RECONNECT_DELAY).await;
    }

    state_tx.send_replace(SubscriberState::Idle);
}

/// Connect and enter CopyBoth mode. LSN 0 resumes from the slot's
/// confirmed position.
async fn open_stream(config: &SubscriberConfig) -> Result<ReplicationStream> {
    let url = Url::parse(&config.connection_string)
        .map_err(|e| CdcError::config(format!("Invalid connection string: {}", e)))?;
    let host = url.host_str().unwrap_or("localhost").to_string();
    let port = url.port().unwrap_or(5432);
    let user = url.username().to_string();
    let password = url.password().map(str::to_string);
    let database = url.path().trim_start_matches('/').to_string();
    let database = if database.is_empty() {
        "postgres".to_string()
    } else {
        database
    };

    let client =
        ReplicationClient::connect(&host, port, &user, &database, password.as_deref()).await?;
    client
        .start_replication(&config.slot_name, 0, &config.publication_names)
        .await
}

/// Drive one live stream until it errors or the consumer goes away.
///
/// Returns `Ok(())` only when the event receiver has been dropped;
/// every other exit is an error that the caller recovers from.
async fn stream_changes(
    mut stream: ReplicationStream,
    event_tx: &mpsc::Sender<ChangeEvent>,
) -> Result<()> {
    // Relation cache is per-connection; the server re-sends Relation
    // messages on every new session.
    let mut relations: HashMap<u32, RelationBody> = HashMap::new();

    loop {
        let Some(mut bytes) = stream.next_message().await? else {
            return Err(CdcError::ConnectionClosed);
        };
        if !bytes.has_remaining() {
            continue;
        }

        match bytes.get_u8() {
            // XLogData
            b'w' => {
                if bytes.remaining() < 24 {
                    return Err(CdcError::replication("Truncated XLogData header"));
                }
                let wal_start = bytes.get_u64();
                let wal_end = bytes.get_u64();
                let _server_ts = bytes.get_i64();

                match crate::protocol::decode(&mut bytes) {
                    Ok(msg) => {
                        if let Some(event) = change_from_message(&mut relations, msg, wal_start) {
                            debug!(
                                "{} on {}.{} at {}",
                                event.op,
                                event.schema,
                                event.table,
                                format_lsn(event.lsn)
                            );
                            if event_tx.send(event).await.is_err() {
                                return Ok(());
                            }
                        }
                    }
                    // Unsupported message: skip, never abort the stream.
                    Err(e) => warn!("Skipping undecodable WAL message: {}", e),
                }

                // Acknowledge after hand-off, not after downstream
                // completion: at-most-once by design.
                stream.send_status_update(wal_end).await?;
                debug!("Acknowledged WAL up to {}", format_lsn(wal_end));
            }
            // Primary keepalive
            b'k' => {
                if bytes.remaining() < 17 {
                    return Err(CdcError::replication("Truncated keepalive"));
                }
                let wal_end = bytes.get_u64();
                let _server_ts = bytes.get_i64();
                let reply_requested = bytes.get_u8() == 1;

                if reply_requested {
                    stream.send_status_update(wal_end).await?;
                    debug!(
                        "Heartbeat reply requested; acknowledged {}",
                        format_lsn(wal_end)
                    );
                }
            }
            t => {
                debug!("Ignoring unknown stream message: {:#04x}", t);
            }
        }
    }
}

/// Turn a decoded pgoutput message into a change event, updating the
/// relation cache along the way. Transaction control and other non-row
/// messages yield `None`.
fn change_from_message(
    relations: &mut HashMap<u32, RelationBody>,
    msg: PgOutputMessage,
    lsn: u64,
) -> Option<ChangeEvent> {
    match msg {
        PgOutputMessage::Relation(rel) => {
            relations.insert(rel.id, rel);
            None
        }
        PgOutputMessage::Insert(ins) => match relations.get(&ins.relation_id) {
            Some(rel) => Some(ChangeEvent::from_insert(rel, &ins, lsn)),
            None => {
                warn!("Insert for unknown relation {}", ins.relation_id);
                None
            }
        },
        PgOutputMessage::Update(upd) => match relations.get(&upd.relation_id) {
            Some(rel) => Some(ChangeEvent::from_update(rel, &upd, lsn)),
            None => {
                warn!("Update for unknown relation {}", upd.relation_id);
                None
            }
        },
        PgOutputMessage::Delete(del) => match relations.get(&del.relation_id) {
            Some(rel) => Some(ChangeEvent::from_delete(rel, &del, lsn)),
            None => {
                warn!("Delete for unknown relation {}", del.relation_id);
                None
            }
        },
        PgOutputMessage::Begin(_)
        | PgOutputMessage::Commit(_)
        | PgOutputMessage::Origin(_)
        | PgOutputMessage::Type(_)
        | PgOutputMessage::Truncate(_) => None,
    }
}
