//! Chat log and outgoing dispatch.
//!
//! Outgoing messages prefer the direct data channel and fall back to a
//! signaling `chat` frame while the direct path is not yet writable. The
//! receiver renders both paths identically, so no de-duplication is needed
//! (the fallback is only used before the direct path opens).

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use papo_net::{NetError, SignalingChannel};
use papo_shared::protocol::{DataChannelFrame, SignalPayload};
use papo_shared::ChatSender;

use crate::media::MediaPipeline;

/// One rendered chat line.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: Uuid,
    pub text: String,
    pub sender: ChatSender,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(text: impl Into<String>, sender: ChatSender) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            sender,
            timestamp: Utc::now(),
        }
    }
}

/// Append-only conversation view held by the controller.
#[derive(Debug, Default)]
pub struct ChatLog {
    messages: Vec<ChatMessage>,
}

impl ChatLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, text: impl Into<String>, sender: ChatSender) -> ChatMessage {
        let msg = ChatMessage::new(text, sender);
        self.messages.push(msg.clone());
        msg
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }
}

/// Which path carried an outgoing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatPath {
    Direct,
    SignalingFallback,
}

/// Dispatch an outgoing message on whichever path is ready.
pub async fn dispatch_outgoing(
    pipeline: &mut dyn MediaPipeline,
    signaling: &SignalingChannel,
    text: &str,
) -> Result<ChatPath, NetError> {
    if pipeline.data_channel_writable() {
        let frame = DataChannelFrame::Chat { text: text.to_string() }.to_json()?;
        if pipeline.send_text(&frame).is_ok() {
            debug!("chat sent on data channel");
            return Ok(ChatPath::Direct);
        }
        // Writability flipped under us; fall through to the relay.
    }

    signaling
        .send(SignalPayload::Chat { text: text.to_string() })
        .await?;
    debug!("chat sent via signaling fallback");
    Ok(ChatPath::SignalingFallback)
}
