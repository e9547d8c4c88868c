use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::Instrument;
use venue_core::events::{ServerEvent, TrackAnnouncement};
use venue_core::ConnectionId;

/// One admitted client channel.
pub struct Connection {
    pub id: ConnectionId,
    pub admitted_at: DateTime<Utc>,
    tx: mpsc::Sender<String>,
    last_pong: AtomicU64,
    /// Tracks this connection announced to the relay. Dropped with the entry.
    tracks: Mutex<Vec<TrackAnnouncement>>,
}

impl Connection {
    fn new(id: ConnectionId, tx: mpsc::Sender<String>) -> Self {
        Self {
            id,
            admitted_at: Utc::now(),
            tx,
            last_pong: AtomicU64::new(now_secs()),
            tracks: Mutex::new(Vec::new()),
        }
    }

    pub fn record_pong(&self) {
        self.last_pong.store(now_secs(), Ordering::Relaxed);
    }

    pub fn is_alive(&self, timeout: Duration) -> bool {
        let last = self.last_pong.load(Ordering::Relaxed);
        now_secs().saturating_sub(last) < timeout.as_secs()
    }

    /// Record a track. Re-announcing the same kind and role is a no-op.
    pub fn add_track(&self, announcement: TrackAnnouncement) -> bool {
        let mut tracks = self.tracks.lock();
        if tracks
            .iter()
            .any(|t| t.kind == announcement.kind && t.role == announcement.role)
        {
            return false;
        }
        tracks.push(announcement);
        true
    }

    pub fn tracks(&self) -> Vec<TrackAnnouncement> {
        self.tracks.lock().clone()
    }

    /// Queue a message without waiting. A full queue drops it.
    fn try_send(&self, message: String) -> bool {
        match self.tx.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(msg)) => {
                tracing::warn!(
                    connection_id = %self.id,
                    msg_len = msg.len(),
                    "send queue full, dropping message"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// The live set of admitted connections.
///
/// Every fan-out goes through [`for_each`](Self::for_each),
/// [`broadcast`](Self::broadcast) or [`send_to`](Self::send_to), which only
/// touch each connection's outbound queue, so tests can drive the registry
/// with plain channel receivers.
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<Connection>>,
    max_send_queue: usize,
}

impl ConnectionRegistry {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            connections: DashMap::new(),
            max_send_queue,
        }
    }

    /// Admit a new channel. Returns its identity and the queue its writer drains.
    pub fn admit(&self) -> (ConnectionId, mpsc::Receiver<String>) {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        self.connections
            .insert(id.clone(), Arc::new(Connection::new(id.clone(), tx)));
        tracing::info!(connection_id = %id, count = self.count(), "client connected");
        (id, rx)
    }

    /// Remove a connection and everything the relay recorded for it.
    /// Releasing an unknown or already released id returns `false`.
    pub fn release(&self, id: &ConnectionId) -> bool {
        match self.connections.remove(id) {
            Some((_, conn)) => {
                let connected_secs = (Utc::now() - conn.admitted_at).num_seconds();
                tracing::info!(
                    connection_id = %id,
                    count = self.count(),
                    connected_secs,
                    "client disconnected"
                );
                true
            }
            None => false,
        }
    }

    pub fn count(&self) -> usize {
        self.connections.len()
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    pub fn get(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.connections.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Visit every admitted connection. `f` must not call back into the
    /// registry's mutating methods.
    pub fn for_each(&self, mut f: impl FnMut(&Connection)) {
        for entry in self.connections.iter() {
            f(entry.value());
        }
    }

    /// Queue a message for one connection. `false` if it is gone or its queue is full.
    pub fn send_to(&self, id: &ConnectionId, message: String) -> bool {
        match self.connections.get(id) {
            Some(conn) => conn.try_send(message),
            None => false,
        }
    }

    pub fn send_event(&self, id: &ConnectionId, event: &ServerEvent) -> bool {
        match event.encode() {
            Ok(json) => self.send_to(id, json),
            Err(e) => {
                tracing::warn!(event_type = event.event_type(), error = %e, "failed to serialize event");
                false
            }
        }
    }

    /// Queue `message` for every connection except `except`. Returns how many accepted it.
    pub fn broadcast(&self, message: &str, except: Option<&ConnectionId>) -> usize {
        let mut delivered = 0;
        self.for_each(|conn| {
            if Some(&conn.id) != except && conn.try_send(message.to_owned()) {
                delivered += 1;
            }
        });
        delivered
    }

    /// Queue `message` for every connection; any connection that cannot take
    /// it is released, which drops its queue and closes its socket.
    /// Returns how many accepted it.
    pub fn broadcast_or_release(&self, message: &str) -> usize {
        let mut delivered = 0;
        let mut stalled = Vec::new();
        self.for_each(|conn| {
            if conn.try_send(message.to_owned()) {
                delivered += 1;
            } else {
                stalled.push(conn.id.clone());
            }
        });

        for id in stalled {
            if self.release(&id) {
                tracing::warn!(connection_id = %id, "released client that could not take a required message");
            }
        }
        delivered
    }

    /// Release connections that have not answered a ping within `timeout`.
    pub fn release_dead(&self, timeout: Duration) -> Vec<ConnectionId> {
        let dead: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|entry| !entry.value().is_alive(timeout))
            .map(|entry| entry.key().clone())
            .collect();

        let mut released = Vec::with_capacity(dead.len());
        for id in dead {
            if self.release(&id) {
                tracing::info!(connection_id = %id, "released unresponsive client");
                released.push(id);
            }
        }
        released
    }
}

/// What a socket hands to the dispatcher.
#[derive(Debug)]
pub enum Inbound {
    Frame { from: ConnectionId, raw: String },
    /// The socket is gone. Queued behind the connection's earlier frames so
    /// release follows the last dispatch.
    Closed(ConnectionId),
}

/// Pump one WebSocket until either side closes, then hand the release to the
/// dispatcher.
///
/// Outbound: drains the connection's queue and pings every `heartbeat`.
/// Inbound: forwards text frames to the dispatcher in arrival order.
pub async fn handle_ws_connection(
    socket: WebSocket,
    connection_id: ConnectionId,
    mut rx: mpsc::Receiver<String>,
    registry: Arc<ConnectionRegistry>,
    on_message: mpsc::Sender<Inbound>,
    heartbeat: Duration,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let span = venue_telemetry::connection_span(&connection_id);

    let writer = tokio::spawn(
        async move {
            let mut ping_interval = tokio::time::interval(heartbeat);
            ping_interval.tick().await;

            loop {
                tokio::select! {
                    msg = rx.recv() => {
                        match msg {
                            Some(text) => {
                                if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                    _ = ping_interval.tick() => {
                        if ws_tx.send(WsMessage::Ping(Vec::<u8>::new().into())).await.is_err() {
                            break;
                        }
                        tracing::trace!("sent ping");
                    }
                }
            }
        }
        .instrument(span.clone()),
    );

    let reader_id = connection_id.clone();
    let reader_registry = Arc::clone(&registry);
    let reader_tx = on_message.clone();
    let reader = tokio::spawn(
        async move {
            while let Some(Ok(msg)) = ws_rx.next().await {
                match msg {
                    WsMessage::Text(text) => {
                        let frame = Inbound::Frame {
                            from: reader_id.clone(),
                            raw: text.to_string(),
                        };
                        if reader_tx.send(frame).await.is_err() {
                            break;
                        }
                    }
                    WsMessage::Pong(_) => {
                        if let Some(conn) = reader_registry.get(&reader_id) {
                            conn.record_pong();
                        }
                    }
                    WsMessage::Close(_) => break,
                    WsMessage::Binary(bytes) => {
                        tracing::debug!(len = bytes.len(), "ignoring binary frame");
                    }
                    WsMessage::Ping(_) => {}
                }
            }
        }
        .instrument(span),
    );

    let writer_abort = writer.abort_handle();
    let reader_abort = reader.abort_handle();
    tokio::select! {
        _ = writer => reader_abort.abort(),
        _ = reader => writer_abort.abort(),
    }

    if let Err(mpsc::error::SendError(Inbound::Closed(id))) =
        on_message.send(Inbound::Closed(connection_id)).await
    {
        // Dispatcher already stopped; nothing left to order against.
        registry.release(&id);
    }
}

/// Periodically release connections whose pings went unanswered.
pub fn start_cleanup_task(
    registry: Arc<ConnectionRegistry>,
    interval: Duration,
    timeout: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = registry.release_dead(timeout);
            if !removed.is_empty() {
                tracing::info!(removed = removed.len(), "dead client cleanup");
            }
        }
    })
}
