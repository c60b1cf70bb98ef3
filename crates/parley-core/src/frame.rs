//! Opaque frame and close-status model.
//!
//! A [`Frame`] is one discrete message unit exchanged over a connection. The
//! relay never parses frame contents; ownership moves from sender to relay to
//! receiver and the relay retains nothing after forwarding.

/// An opaque message payload, text or binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A text message.
    Text(String),
    /// A binary message.
    Binary(Vec<u8>),
}

impl Frame {
    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        match self {
            Frame::Text(s) => s.len(),
            Frame::Binary(b) => b.len(),
        }
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// How a session ended, mapped onto distinct WebSocket close codes so the
/// inbound caller can tell "never connected" from "ended mid-session" from
/// "completed normally".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseStatus {
    /// Session completed normally (a peer sent a normal close).
    Normal,
    /// Credential missing; the session was refused before any dial attempt.
    ConfigError,
    /// The upstream dial was refused, reset, or timed out.
    UpstreamUnavailable,
    /// A read or write failed mid-session on either side.
    TransportFault(String),
    /// A peer closed with its own non-normal code; mirrored to the other side.
    Mirrored { code: u16, reason: String },
}

impl CloseStatus {
    /// The WebSocket close code carried to the surviving side.
    pub fn code(&self) -> u16 {
        match self {
            CloseStatus::Normal => 1000,
            CloseStatus::ConfigError => 1008,
            CloseStatus::UpstreamUnavailable => 1013,
            CloseStatus::TransportFault(_) => 1011,
            CloseStatus::Mirrored { code, .. } => *code,
        }
    }

    /// Human-readable close reason.
    pub fn reason(&self) -> String {
        match self {
            CloseStatus::Normal => String::new(),
            CloseStatus::ConfigError => "upstream credential not configured".to_string(),
            CloseStatus::UpstreamUnavailable => "upstream unavailable".to_string(),
            CloseStatus::TransportFault(reason) => reason.clone(),
            CloseStatus::Mirrored { reason, .. } => reason.clone(),
        }
    }

    /// Whether the session ever reached the streaming state.
    pub fn connected(&self) -> bool {
        !matches!(
            self,
            CloseStatus::ConfigError | CloseStatus::UpstreamUnavailable
        )
    }
}
