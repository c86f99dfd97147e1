//! Conversation history.
//!
//! Best-effort storage: the controller opens a conversation when a session
//! reaches "connected", mirrors every exchanged chat line into it and stamps
//! the end time on teardown. Failures here are logged by the caller and never
//! block the session lifecycle.

use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use papo_shared::constants::LAST_MESSAGE_PREVIEW_LEN;
use papo_shared::{ChatSender, Identity, SessionId};

use crate::database::{decode_ts, encode_ts, Database};
use crate::error::{Result, StoreError};
use crate::models::{Conversation, StoredMessage};

impl Database {
    pub fn create_conversation(&self, conversation: &Conversation) -> Result<()> {
        self.conn().execute(
            "INSERT INTO conversations
                 (id, session_id, owner, partner_label, started_at, ended_at,
                  last_message, message_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                conversation.id.to_string(),
                conversation.session_id.to_string(),
                conversation.owner.as_str(),
                conversation.partner_label,
                encode_ts(conversation.started_at),
                conversation.ended_at.map(encode_ts),
                conversation.last_message,
                conversation.message_count,
            ],
        )?;
        Ok(())
    }

    /// Append a chat line and update the parent's preview and counter.
    pub fn append_conversation_message(&self, message: &StoredMessage) -> Result<()> {
        self.conn().execute(
            "INSERT INTO conversation_messages
                 (id, conversation_id, sender_type, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                message.id.to_string(),
                message.conversation_id.to_string(),
                message.sender.as_str(),
                message.content,
                encode_ts(message.created_at),
            ],
        )?;

        let preview: String = message.content.chars().take(LAST_MESSAGE_PREVIEW_LEN).collect();
        self.conn().execute(
            "UPDATE conversations
             SET last_message = ?2, message_count = message_count + 1
             WHERE id = ?1",
            params![message.conversation_id.to_string(), preview],
        )?;
        Ok(())
    }

    /// Stamp the conversation's end time. Idempotent on already-ended rows.
    pub fn end_conversation(&self, id: Uuid, ended_at: DateTime<Utc>) -> Result<()> {
        self.conn().execute(
            "UPDATE conversations SET ended_at = ?2 WHERE id = ?1 AND ended_at IS NULL",
            params![id.to_string(), encode_ts(ended_at)],
        )?;
        Ok(())
    }

    pub fn get_conversation(&self, id: Uuid) -> Result<Conversation> {
        self.conn()
            .query_row(
                "SELECT id, session_id, owner, partner_label, started_at, ended_at,
                        last_message, message_count
                 FROM conversations WHERE id = ?1",
                params![id.to_string()],
                row_to_conversation,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// All conversations of one local participant, most recent first.
    pub fn list_conversations(&self, owner: &Identity) -> Result<Vec<Conversation>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, session_id, owner, partner_label, started_at, ended_at,
                    last_message, message_count
             FROM conversations
             WHERE owner = ?1
             ORDER BY started_at DESC",
        )?;

        let rows = stmt.query_map(params![owner.as_str()], row_to_conversation)?;

        let mut conversations = Vec::new();
        for row in rows {
            conversations.push(row?);
        }
        Ok(conversations)
    }

    /// The stored lines of one conversation, oldest first.
    pub fn get_conversation_messages(&self, conversation_id: Uuid) -> Result<Vec<StoredMessage>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, conversation_id, sender_type, content, created_at
             FROM conversation_messages
             WHERE conversation_id = ?1
             ORDER BY created_at",
        )?;

        let rows = stmt.query_map(params![conversation_id.to_string()], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }
}

fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    let id_str: String = row.get(0)?;
    let session_str: String = row.get(1)?;
    let owner: String = row.get(2)?;
    let started_str: String = row.get(4)?;
    let ended_str: Option<String> = row.get(5)?;

    let id = parse_uuid(&id_str, 0)?;
    let session_id = SessionId(parse_uuid(&session_str, 1)?);
    let started_at = parse_ts(&started_str, 4)?;
    let ended_at = ended_str.as_deref().map(|s| parse_ts(s, 5)).transpose()?;

    Ok(Conversation {
        id,
        session_id,
        owner: Identity::new(owner),
        partner_label: row.get(3)?,
        started_at,
        ended_at,
        last_message: row.get(6)?,
        message_count: row.get(7)?,
    })
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredMessage> {
    let id_str: String = row.get(0)?;
    let conv_str: String = row.get(1)?;
    let sender_str: String = row.get(2)?;
    let created_str: String = row.get(4)?;

    Ok(StoredMessage {
        id: parse_uuid(&id_str, 0)?,
        conversation_id: parse_uuid(&conv_str, 1)?,
        sender: ChatSender::parse(&sender_str).unwrap_or(ChatSender::Peer),
        content: row.get(3)?,
        created_at: parse_ts(&created_str, 4)?,
    })
}

fn parse_uuid(s: &str, col: usize) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(col, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn parse_ts(s: &str, col: usize) -> rusqlite::Result<DateTime<Utc>> {
    decode_ts(s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(col, rusqlite::types::Type::Text, Box::new(e))
    })
}
