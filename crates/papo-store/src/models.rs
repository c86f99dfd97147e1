use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use papo_shared::{ChatSender, Gender, Identity, PresenceStatus, SessionId};

/// Display attributes carried by a presence registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceAttrs {
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub gender: Option<Gender>,
    pub country: String,
    pub bio: String,
    pub is_anonymous: bool,
    pub status: PresenceStatus,
}

impl PresenceAttrs {
    /// Minimal anonymous profile, the common case for first contact.
    pub fn anonymous(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            avatar_url: None,
            gender: None,
            country: "BR".to_string(),
            bio: String::new(),
            is_anonymous: true,
            status: PresenceStatus::Online,
        }
    }
}

/// One row of the presence directory.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PresenceRecord {
    pub identity: Identity,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub gender: Option<Gender>,
    pub country: String,
    pub bio: String,
    pub is_anonymous: bool,
    pub status: PresenceStatus,
    pub last_seen: DateTime<Utc>,
}

/// One saved conversation, keyed by the session that produced it.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Conversation {
    pub id: Uuid,
    pub session_id: SessionId,
    pub owner: Identity,
    pub partner_label: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub last_message: Option<String>,
    pub message_count: u32,
}

impl Conversation {
    pub fn open(session_id: SessionId, owner: Identity, partner_label: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            owner,
            partner_label: partner_label.into(),
            started_at: Utc::now(),
            ended_at: None,
            last_message: None,
            message_count: 0,
        }
    }
}

/// One persisted chat line. System lines are never stored.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StoredMessage {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender: ChatSender,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl StoredMessage {
    pub fn new(conversation_id: Uuid, sender: ChatSender, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            conversation_id,
            sender,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}
