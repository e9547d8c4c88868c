use std::sync::Arc;

use tokio::sync::mpsc;
use venue_core::events::{Ack, ClientEvent, FrameHeader, ServerEvent};
use venue_core::{ConnectionId, SceneIndex};

use crate::client::{ConnectionRegistry, Inbound};
use crate::ingest::{IngestError, UploadIngestor};
use crate::relay::SignalingRelay;
use crate::scene::SceneCoordinator;

/// Everything the event loop and the HTTP surface share.
pub struct VenueState {
    pub registry: Arc<ConnectionRegistry>,
    pub scene: SceneCoordinator,
    pub relay: SignalingRelay,
    pub ingestor: UploadIngestor,
}

impl VenueState {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        initial_scene: Option<SceneIndex>,
        ingestor: UploadIngestor,
    ) -> Self {
        Self {
            scene: SceneCoordinator::new(Arc::clone(&registry), initial_scene),
            relay: SignalingRelay::new(Arc::clone(&registry)),
            registry,
            ingestor,
        }
    }

    /// Admit a connection and bring it up to date: current scene first, then
    /// tracks already being published.
    pub fn admit(&self) -> (ConnectionId, mpsc::Receiver<String>) {
        let (id, rx) = self.registry.admit();
        self.scene.on_admit(&id);
        self.relay.on_admit(&id);
        (id, rx)
    }
}

/// Single event loop: handles inbound frames from every connection in arrival order.
/// A connection's `Closed` arrives behind its last frame, so nothing it sent
/// before hanging up is dropped. Runs until all senders are dropped.
pub async fn process_messages(mut rx: mpsc::Receiver<Inbound>, state: Arc<VenueState>) {
    while let Some(inbound) = rx.recv().await {
        match inbound {
            Inbound::Frame { from, raw } => dispatch(&state, &from, raw),
            Inbound::Closed(id) => {
                state.registry.release(&id);
            }
        }
    }
    tracing::debug!("dispatcher stopped");
}

/// Handle one inbound frame. Never blocks: only the header is read here.
/// Uploads are decoded and stored on their own task and ack the sender when
/// they finish.
pub fn dispatch(state: &Arc<VenueState>, from: &ConnectionId, raw: String) {
    if !state.registry.contains(from) {
        tracing::debug!(connection_id = %from, "dropping frame from released connection");
        return;
    }

    let header = match FrameHeader::peek(&raw) {
        Ok(header) => header,
        Err(e) => {
            tracing::warn!(connection_id = %from, error = %e, "malformed frame");
            state.registry.send_event(from, &ServerEvent::error(e.to_string()));
            return;
        }
    };

    if header.expects_ack() {
        tracing::debug!(connection_id = %from, event = %header.event, bytes = raw.len(), "queueing upload");
        let state = Arc::clone(state);
        let from = from.clone();
        tokio::spawn(async move {
            let result = ingest_frame(&state.ingestor, raw).await;
            send_ack(&state, &from, header.id, result);
        });
        return;
    }

    let event = match ClientEvent::decode(&raw) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(
                connection_id = %from,
                error_kind = e.error_kind(),
                error = %e,
                "rejected client event"
            );
            state.registry.send_event(from, &ServerEvent::error(e.to_string()));
            return;
        }
    };

    tracing::debug!(connection_id = %from, event = event.name(), "dispatching");

    match event {
        ClientEvent::Signal(request) => {
            if let Err(e) = state.relay.relay(from, request) {
                tracing::debug!(connection_id = %from, error = %e, "signal not relayed");
                state.registry.send_event(from, &ServerEvent::error(e.to_string()));
            }
        }
        ClientEvent::AnnounceTrack { kind, role } => {
            state.relay.announce(from, kind, role);
        }
        upload @ (ClientEvent::UploadAudio { .. } | ClientEvent::UploadText(_)) => {
            let state = Arc::clone(state);
            let from = from.clone();
            tokio::spawn(async move {
                let result = ingest_event(&state.ingestor, upload).await;
                send_ack(&state, &from, header.id, result);
            });
        }
    }
}

/// Full parse and base64 decode of an upload frame, off the event loop.
async fn ingest_frame(ingestor: &UploadIngestor, raw: String) -> Result<(), IngestError> {
    let event = tokio::task::spawn_blocking(move || ClientEvent::decode(&raw))
        .await
        .map_err(|e| IngestError::Worker(e.to_string()))??;
    ingest_event(ingestor, event).await
}

async fn ingest_event(ingestor: &UploadIngestor, event: ClientEvent) -> Result<(), IngestError> {
    match event {
        ClientEvent::UploadAudio { name, data } => ingestor.ingest_audio(&name, &data).await.map(|_| ()),
        ClientEvent::UploadText(message) => ingestor.ingest_text(message).await.map(|_| ()),
        other => Err(IngestError::Worker(format!("{} is not an upload", other.name()))),
    }
}

fn send_ack(
    state: &VenueState,
    to: &ConnectionId,
    ack_id: Option<u64>,
    result: Result<(), IngestError>,
) {
    let ack = match result {
        Ok(()) => Ack::success(ack_id),
        Err(e) => {
            match &e {
                IngestError::Write { .. } | IngestError::Store(_) | IngestError::Worker(_) => {
                    tracing::error!(connection_id = %to, error = %e, "ingest failed");
                }
                _ => tracing::warn!(connection_id = %to, error = %e, "upload rejected"),
            }
            Ack::failure(ack_id, e.to_string())
        }
    };
    if !state.registry.send_event(to, &ServerEvent::Ack(ack)) {
        tracing::debug!(connection_id = %to, "ack dropped, connection gone");
    }
}
