//! Bus wire protocol.
//!
//! Two message families travel over the pub/sub bus: [`LobbyMessage`] on the
//! shared matchmaking topic and [`SignalMessage`] on per-session signaling
//! topics. Both are bincode-framed. Chat sent over the direct data channel
//! uses the JSON [`DataChannelFrame`] instead, matching what a browser peer
//! puts on an RTCDataChannel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::types::{Identity, SessionId};

/// Messages on the shared matchmaking topic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum LobbyMessage {
    /// Periodic "I want a match" broadcast. Re-published every couple of
    /// seconds while searching; duplicates are idempotent.
    Seeking {
        identity: Identity,
        sent_at: DateTime<Utc>,
    },

    /// One-time pairing decision, published by the elected initiator and
    /// meaningful only to the named responder.
    MatchProposal {
        session_id: SessionId,
        initiator: Identity,
        responder: Identity,
    },
}

/// A signaling frame, stamped with its sender for self-filtering.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignalMessage {
    pub sender: Identity,
    pub payload: SignalPayload,
}

/// Session-establishment and control messages relayed between the two
/// parties of one session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum SignalPayload {
    /// Responder's "my subscription is open, send the offer now".
    Ready,
    /// SDP offer (initiator -> responder). May arrive more than once; only
    /// the first is answered.
    Offer { sdp: String },
    /// SDP answer (responder -> initiator). Stops the offer retry loop.
    Answer { sdp: String },
    /// Connectivity candidate, relayed unordered and unconditionally.
    Candidate { candidate: String },
    /// Sent exactly once on explicit disconnect/skip or clean teardown.
    Leave,
    /// Chat fallback, used only before the direct data path is writable.
    Chat { text: String },
}

impl SignalPayload {
    /// Short tag for log output.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::Candidate { .. } => "candidate",
            Self::Leave => "leave",
            Self::Chat { .. } => "chat",
        }
    }
}

/// Frames exchanged over the direct data channel once it is open.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DataChannelFrame {
    Chat { text: String },
}

impl LobbyMessage {
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        Ok(bincode::deserialize(data)?)
    }
}

impl SignalMessage {
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        Ok(bincode::deserialize(data)?)
    }
}

impl DataChannelFrame {
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(data: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(data)?)
    }
}
