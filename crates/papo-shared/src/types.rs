use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::SIGNALING_TOPIC_PREFIX;

/// Opaque participant key, valid for one liveness period.
///
/// The derived `Ord` gives the total, deterministic order used by the lobby
/// tie-break: of two concurrently seeking identities, the strictly lower one
/// becomes the initiator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Identity(String);

impl Identity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mint a fresh anonymous identity (`anon-` + 16 hex chars).
    ///
    /// Anonymous visitors get one of these per browser/app session; it is
    /// never persisted across liveness periods.
    pub fn anonymous() -> Self {
        let mut bytes = [0u8; 8];
        rand::Rng::fill(&mut rand::thread_rng(), &mut bytes);
        Self(format!("anon-{}", hex::encode(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Truncated form for log output.
    pub fn short(&self) -> &str {
        let end = self.0.len().min(12);
        &self.0[..end]
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fresh unique id minted by the initiator for each matched session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Bus topic carrying this session's signaling traffic.
    pub fn to_signaling_topic(&self) -> String {
        format!("{}{}", SIGNALING_TOPIC_PREFIX, self.0)
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The two deterministic roles in a matched session.
///
/// The initiator creates the SDP offer and the data channel; the responder
/// answers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

/// Presence status advertised in the online directory.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PresenceStatus {
    Online,
    Busy,
    InChat,
}

impl PresenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Busy => "busy",
            Self::InChat => "in_chat",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "online" => Some(Self::Online),
            "busy" => Some(Self::Busy),
            "in_chat" => Some(Self::InChat),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Male => "male",
            Self::Female => "female",
            Self::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "male" => Some(Self::Male),
            "female" => Some(Self::Female),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

/// Attribution of a chat line in the local conversation log.
///
/// `System` lines ("connected", "peer left", ...) are synthesized locally by
/// the controller and never transmitted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChatSender {
    Me,
    Peer,
    System,
}

impl ChatSender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Me => "me",
            Self::Peer => "peer",
            Self::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "me" => Some(Self::Me),
            "peer" => Some(Self::Peer),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}
