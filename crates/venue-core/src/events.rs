//! Wire protocol spoken over the coordination socket.
//!
//! Every frame is a JSON object `{ "event": <name>, "data": <payload> }`.
//! Client frames may carry an `id`; requests that expect an acknowledgment
//! (`uploadAudio`, `uploadText`) get exactly one `ack` echoing it.

use std::fmt;

use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ProtocolError;
use crate::ids::ConnectionId;
use crate::scene::SceneIndex;

pub const UPLOAD_AUDIO: &str = "uploadAudio";
pub const UPLOAD_TEXT: &str = "uploadText";
pub const SIGNAL: &str = "signal";
pub const ANNOUNCE_TRACK: &str = "announceTrack";

/// Role label that addresses a signal or track to every audience member.
pub const BROADCAST_ROLE: &str = "broadcast";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => f.write_str("audio"),
            Self::Video => f.write_str("video"),
        }
    }
}

/// Label clients key their media elements on, e.g. `video-broadcast`.
pub fn track_label(kind: TrackKind, role: &str) -> String {
    format!("{kind}-{role}")
}

/// A track a connection has told the relay it is publishing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackAnnouncement {
    pub origin: ConnectionId,
    pub kind: TrackKind,
    pub role: String,
}

impl TrackAnnouncement {
    pub fn label(&self) -> String {
        track_label(self.kind, &self.role)
    }
}

/// Whether the sender of `event` is owed exactly one `ack`.
pub fn expects_ack(event: &str) -> bool {
    matches!(event, UPLOAD_AUDIO | UPLOAD_TEXT)
}

/// Event name and request id of a client frame. `data` is skipped without
/// being materialized, so peeking a large upload stays cheap.
#[derive(Debug, Deserialize)]
pub struct FrameHeader {
    pub event: String,
    #[serde(default)]
    pub id: Option<u64>,
}

impl FrameHeader {
    pub fn peek(raw: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(raw).map_err(|e| ProtocolError::MalformedFrame(e.to_string()))
    }

    pub fn expects_ack(&self) -> bool {
        expects_ack(&self.event)
    }
}

/// Undecoded client frame. Only the envelope is checked here.
#[derive(Debug, Deserialize)]
pub struct InboundFrame {
    pub event: String,
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub data: Value,
}

impl InboundFrame {
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(raw).map_err(|e| ProtocolError::MalformedFrame(e.to_string()))
    }
}

/// Media negotiation message addressed by a client.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct SignalRequest {
    #[serde(default)]
    pub to: Option<ConnectionId>,
    pub kind: TrackKind,
    pub role: String,
    /// SDP, ICE, or whatever the media layer sends. Never inspected.
    #[serde(default)]
    pub payload: Value,
}

/// Where a signal goes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SignalTarget {
    Peer(ConnectionId),
    Broadcast,
}

impl SignalRequest {
    pub fn target(&self) -> Result<SignalTarget, ProtocolError> {
        match &self.to {
            Some(peer) => Ok(SignalTarget::Peer(peer.clone())),
            None if self.role == BROADCAST_ROLE => Ok(SignalTarget::Broadcast),
            None => Err(ProtocolError::NoRecipient),
        }
    }

    pub fn label(&self) -> String {
        track_label(self.kind, &self.role)
    }
}

/// A validated client event.
#[derive(Clone, Debug, PartialEq)]
pub enum ClientEvent {
    UploadAudio { name: String, data: Vec<u8> },
    UploadText(String),
    Signal(SignalRequest),
    AnnounceTrack { kind: TrackKind, role: String },
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::UploadAudio { .. } => UPLOAD_AUDIO,
            Self::UploadText(_) => UPLOAD_TEXT,
            Self::Signal(_) => SIGNAL,
            Self::AnnounceTrack { .. } => ANNOUNCE_TRACK,
        }
    }

    /// Parse and validate a raw frame in one step.
    pub fn decode(raw: &str) -> Result<Self, ProtocolError> {
        Self::try_from(InboundFrame::parse(raw)?)
    }
}

#[derive(Deserialize)]
struct UploadAudioPayload {
    name: String,
    data: BinaryData,
}

/// Audio bytes arrive base64-encoded, or as a plain byte array from
/// clients that serialize buffers directly.
#[derive(Deserialize)]
#[serde(untagged)]
enum BinaryData {
    Encoded(String),
    Raw(Vec<u8>),
}

#[derive(Deserialize)]
struct AnnounceTrackPayload {
    kind: TrackKind,
    role: String,
}

impl TryFrom<InboundFrame> for ClientEvent {
    type Error = ProtocolError;

    fn try_from(frame: InboundFrame) -> Result<Self, Self::Error> {
        match frame.event.as_str() {
            UPLOAD_AUDIO => {
                let payload: UploadAudioPayload = serde_json::from_value(frame.data)
                    .map_err(|e| ProtocolError::invalid(UPLOAD_AUDIO, e.to_string()))?;
                if payload.name.trim().is_empty() {
                    return Err(ProtocolError::invalid(UPLOAD_AUDIO, "name must not be empty"));
                }
                let data = match payload.data {
                    BinaryData::Raw(bytes) => bytes,
                    BinaryData::Encoded(text) => base64::engine::general_purpose::STANDARD
                        .decode(text.as_bytes())
                        .map_err(|e| ProtocolError::invalid(UPLOAD_AUDIO, format!("data: {e}")))?,
                };
                Ok(Self::UploadAudio {
                    name: payload.name,
                    data,
                })
            }
            UPLOAD_TEXT => match frame.data {
                Value::String(text) => Ok(Self::UploadText(text)),
                other => Err(ProtocolError::invalid(
                    UPLOAD_TEXT,
                    format!("expected a string, got {}", json_type(&other)),
                )),
            },
            SIGNAL => {
                let request: SignalRequest = serde_json::from_value(frame.data)
                    .map_err(|e| ProtocolError::invalid(SIGNAL, e.to_string()))?;
                if request.role.is_empty() {
                    return Err(ProtocolError::invalid(SIGNAL, "role must not be empty"));
                }
                request.target()?;
                Ok(Self::Signal(request))
            }
            ANNOUNCE_TRACK => {
                let payload: AnnounceTrackPayload = serde_json::from_value(frame.data)
                    .map_err(|e| ProtocolError::invalid(ANNOUNCE_TRACK, e.to_string()))?;
                if payload.role.is_empty() {
                    return Err(ProtocolError::invalid(ANNOUNCE_TRACK, "role must not be empty"));
                }
                Ok(Self::AnnounceTrack {
                    kind: payload.kind,
                    role: payload.role,
                })
            }
            other => Err(ProtocolError::UnknownEvent(other.to_owned())),
        }
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    Success,
    Failure,
}

/// Acknowledgment for one upload request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub id: Option<u64>,
    pub message: AckStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Ack {
    pub fn success(id: Option<u64>) -> Self {
        Self {
            id,
            message: AckStatus::Success,
            reason: None,
        }
    }

    pub fn failure(id: Option<u64>, reason: impl Into<String>) -> Self {
        Self {
            id,
            message: AckStatus::Failure,
            reason: Some(reason.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.message == AckStatus::Success
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RelayedSignal {
    pub from: ConnectionId,
    pub kind: TrackKind,
    pub label: String,
    pub payload: Value,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackNotice {
    pub from: ConnectionId,
    pub kind: TrackKind,
    pub label: String,
}

impl From<&TrackAnnouncement> for TrackNotice {
    fn from(announcement: &TrackAnnouncement) -> Self {
        Self {
            from: announcement.origin.clone(),
            kind: announcement.kind,
            label: announcement.label(),
        }
    }
}

/// Everything the server pushes to a client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    SceneIdx(SceneIndex),
    Ack(Ack),
    Signal(RelayedSignal),
    TrackAnnounced(TrackNotice),
    Error { message: String },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::SceneIdx(_) => "sceneIdx",
            Self::Ack(_) => "ack",
            Self::Signal(_) => "signal",
            Self::TrackAnnounced(_) => "trackAnnounced",
            Self::Error { .. } => "error",
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
