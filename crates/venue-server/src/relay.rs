use std::sync::Arc;

use venue_core::events::{
    RelayedSignal, ServerEvent, SignalRequest, SignalTarget, TrackAnnouncement, TrackKind,
    TrackNotice,
};
use venue_core::{ConnectionId, ProtocolError};

use crate::client::ConnectionRegistry;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("no connected peer {0}")]
    UnknownPeer(ConnectionId),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Forwards media negotiation between peers. Payloads pass through untouched;
/// the only state kept is each connection's announced tracks, stored on the
/// registry entry so release drops it.
pub struct SignalingRelay {
    registry: Arc<ConnectionRegistry>,
}

impl SignalingRelay {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Forward a signal from `from`. Returns how many connections it was queued for.
    pub fn relay(&self, from: &ConnectionId, request: SignalRequest) -> Result<usize, RelayError> {
        let target = request.target()?;
        let kind = request.kind;
        let event = ServerEvent::Signal(RelayedSignal {
            from: from.clone(),
            kind: request.kind,
            label: request.label(),
            payload: request.payload,
        });

        match target {
            SignalTarget::Peer(to) => {
                if !self.registry.contains(&to) {
                    tracing::debug!(from = %from, to = %to, "signal target not connected");
                    return Err(RelayError::UnknownPeer(to));
                }
                let delivered = usize::from(self.registry.send_event(&to, &event));
                tracing::debug!(from = %from, to = %to, kind = %kind, "signal relayed");
                Ok(delivered)
            }
            SignalTarget::Broadcast => {
                let json = match event.encode() {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::warn!(from = %from, error = %e, "failed to serialize signal");
                        return Ok(0);
                    }
                };
                let delivered = self.registry.broadcast(&json, Some(from));
                tracing::debug!(from = %from, delivered, "signal broadcast");
                Ok(delivered)
            }
        }
    }

    /// Record a track published by `from` and tell everyone else about it.
    /// Re-announcing an already recorded track notifies nobody.
    pub fn announce(&self, from: &ConnectionId, kind: TrackKind, role: String) -> usize {
        let Some(conn) = self.registry.get(from) else {
            return 0;
        };
        let announcement = TrackAnnouncement {
            origin: from.clone(),
            kind,
            role,
        };
        let notice = TrackNotice::from(&announcement);
        if !conn.add_track(announcement) {
            return 0;
        }

        let json = match ServerEvent::TrackAnnounced(notice).encode() {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(from = %from, error = %e, "failed to serialize track notice");
                return 0;
            }
        };
        let delivered = self.registry.broadcast(&json, Some(from));
        tracing::info!(from = %from, kind = %kind, delivered, "track announced");
        delivered
    }

    /// Tell a newly admitted connection about tracks announced before it joined.
    pub fn on_admit(&self, id: &ConnectionId) -> usize {
        // Collect first: sending while iterating would re-enter the registry.
        let mut notices = Vec::new();
        self.registry.for_each(|conn| {
            if &conn.id != id {
                notices.extend(conn.tracks().iter().map(TrackNotice::from));
            }
        });

        notices
            .into_iter()
            .filter(|notice| {
                self.registry
                    .send_event(id, &ServerEvent::TrackAnnounced(notice.clone()))
            })
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;
    use venue_core::events::BROADCAST_ROLE;

    fn drain(rx: &mut mpsc::Receiver<String>) -> Vec<ServerEvent> {
        let mut out = Vec::new();
        while let Ok(raw) = rx.try_recv() {
            out.push(serde_json::from_str(&raw).unwrap());
        }
        out
    }

    fn setup() -> (Arc<ConnectionRegistry>, SignalingRelay) {
        let registry = Arc::new(ConnectionRegistry::new(32));
        let relay = SignalingRelay::new(Arc::clone(&registry));
        (registry, relay)
    }

    fn directed(to: &ConnectionId) -> SignalRequest {
        SignalRequest {
            to: Some(to.clone()),
            kind: TrackKind::Video,
            role: "peer".into(),
            payload: json!({"sdp": "v=0"}),
        }
    }

    #[test]
    fn directed_signal_reaches_only_target() {
        let (registry, relay) = setup();
        let (a, mut rx_a) = registry.admit();
        let (b, mut rx_b) = registry.admit();
        let (_c, mut rx_c) = registry.admit();

        assert_eq!(relay.relay(&a, directed(&b)).unwrap(), 1);

        let received = drain(&mut rx_b);
        assert_eq!(
            received,
            vec![ServerEvent::Signal(RelayedSignal {
                from: a.clone(),
                kind: TrackKind::Video,
                label: "video-peer".into(),
                payload: json!({"sdp": "v=0"}),
            })]
        );
        assert!(drain(&mut rx_a).is_empty());
        assert!(drain(&mut rx_c).is_empty());
    }

    #[test]
    fn directed_signal_to_departed_peer_fails() {
        let (registry, relay) = setup();
        let (a, _rx_a) = registry.admit();
        let (b, mut rx_b) = registry.admit();
        registry.release(&b);

        let err = relay.relay(&a, directed(&b)).unwrap_err();
        assert!(matches!(err, RelayError::UnknownPeer(ref id) if id == &b), "got: {err}");
        assert!(drain(&mut rx_b).is_empty());
    }

    #[test]
    fn broadcast_signal_skips_originator() {
        let (registry, relay) = setup();
        let (stage, mut rx_stage) = registry.admit();
        let (_a, mut rx_a) = registry.admit();
        let (_b, mut rx_b) = registry.admit();

        let request = SignalRequest {
            to: None,
            kind: TrackKind::Audio,
            role: BROADCAST_ROLE.into(),
            payload: json!("offer"),
        };
        assert_eq!(relay.relay(&stage, request).unwrap(), 2);

        assert!(drain(&mut rx_stage).is_empty());
        for rx in [&mut rx_a, &mut rx_b] {
            let events = drain(rx);
            assert_eq!(events.len(), 1);
            let ServerEvent::Signal(signal) = &events[0] else {
                panic!("expected signal, got {:?}", events[0]);
            };
            assert_eq!(signal.from, stage);
            assert_eq!(signal.label, "audio-broadcast");
            assert_eq!(signal.payload, json!("offer"));
        }
    }

    #[test]
    fn signal_without_recipient_is_rejected() {
        let (registry, relay) = setup();
        let (a, _rx) = registry.admit();
        let request = SignalRequest {
            to: None,
            kind: TrackKind::Audio,
            role: "peer".into(),
            payload: json!(null),
        };
        assert!(matches!(
            relay.relay(&a, request),
            Err(RelayError::Protocol(ProtocolError::NoRecipient))
        ));
    }

    #[test]
    fn announce_notifies_others_once() {
        let (registry, relay) = setup();
        let (stage, mut rx_stage) = registry.admit();
        let (_a, mut rx_a) = registry.admit();

        assert_eq!(relay.announce(&stage, TrackKind::Video, BROADCAST_ROLE.into()), 1);
        assert_eq!(relay.announce(&stage, TrackKind::Video, BROADCAST_ROLE.into()), 0);

        assert!(drain(&mut rx_stage).is_empty());
        assert_eq!(
            drain(&mut rx_a),
            vec![ServerEvent::TrackAnnounced(TrackNotice {
                from: stage,
                kind: TrackKind::Video,
                label: "video-broadcast".into(),
            })]
        );
    }

    #[test]
    fn late_joiner_learns_existing_tracks() {
        let (registry, relay) = setup();
        let (stage, _rx_stage) = registry.admit();
        relay.announce(&stage, TrackKind::Video, BROADCAST_ROLE.into());
        relay.announce(&stage, TrackKind::Audio, BROADCAST_ROLE.into());

        let (late, mut rx_late) = registry.admit();
        assert_eq!(relay.on_admit(&late), 2);

        let labels: Vec<String> = drain(&mut rx_late)
            .into_iter()
            .map(|event| match event {
                ServerEvent::TrackAnnounced(notice) => notice.label,
                other => panic!("unexpected event: {other:?}"),
            })
            .collect();
        assert_eq!(labels, vec!["video-broadcast", "audio-broadcast"]);
    }

    #[test]
    fn released_publisher_tracks_are_forgotten() {
        let (registry, relay) = setup();
        let (stage, _rx_stage) = registry.admit();
        relay.announce(&stage, TrackKind::Video, BROADCAST_ROLE.into());
        registry.release(&stage);

        let (late, mut rx_late) = registry.admit();
        assert_eq!(relay.on_admit(&late), 0);
        assert!(drain(&mut rx_late).is_empty());
    }

    #[test]
    fn announce_from_unknown_connection_is_ignored() {
        let (registry, relay) = setup();
        let (_a, mut rx_a) = registry.admit();
        let ghost = ConnectionId::new();
        assert_eq!(relay.announce(&ghost, TrackKind::Audio, "peer".into()), 0);
        assert!(drain(&mut rx_a).is_empty());
    }
}
