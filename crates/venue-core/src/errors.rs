/// Rejections raised while decoding a client frame, before anything is dispatched.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("unknown event: {0}")]
    UnknownEvent(String),

    #[error("invalid {event} payload: {reason}")]
    InvalidPayload { event: &'static str, reason: String },

    #[error("signal has no recipient: set `to` or use the broadcast role")]
    NoRecipient,
}

impl ProtocolError {
    pub fn invalid(event: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidPayload {
            event,
            reason: reason.into(),
        }
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::MalformedFrame(_) => "malformed_frame",
            Self::UnknownEvent(_) => "unknown_event",
            Self::InvalidPayload { .. } => "invalid_payload",
            Self::NoRecipient => "no_recipient",
        }
    }
}
