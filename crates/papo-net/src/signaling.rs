//! Per-session signaling relay.
//!
//! A [`SignalingChannel`] is scoped to exactly one session id and relays
//! offer/answer/candidate plus the control messages (ready/leave/chat)
//! between the two matched parties. It is a stateless relay: beyond its open
//! subscription it holds no session state, and all handshake policy (offer
//! retries, ready acknowledgment) lives in the lifecycle controller.

use tracing::{debug, warn};

use papo_shared::protocol::{SignalMessage, SignalPayload};
use papo_shared::{Identity, SessionId};

use crate::bus::{BusHandle, Subscription};
use crate::error::NetError;

pub struct SignalingChannel {
    session_id: SessionId,
    identity: Identity,
    sub: Option<Subscription>,
}

impl SignalingChannel {
    /// Subscribe to the session's signaling topic.
    pub async fn open(
        bus: &BusHandle,
        session_id: SessionId,
        identity: Identity,
    ) -> Result<Self, NetError> {
        let sub = bus.subscribe(&session_id.to_signaling_topic()).await?;
        debug!(session = %session_id, identity = %identity.short(), "signaling channel open");

        Ok(Self {
            session_id,
            identity,
            sub: Some(sub),
        })
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn is_open(&self) -> bool {
        self.sub.is_some()
    }

    /// Send a payload to the peer, stamped with our identity.
    pub async fn send(&self, payload: SignalPayload) -> Result<(), NetError> {
        let Some(sub) = &self.sub else {
            return Err(NetError::SignalingClosed);
        };

        debug!(
            session = %self.session_id,
            kind = payload.kind(),
            "sending signal"
        );

        let msg = SignalMessage {
            sender: self.identity.clone(),
            payload,
        };
        sub.publish(msg.to_bytes()?).await
    }

    /// Receive the next signal from the peer.
    ///
    /// Frames we sent ourselves and frames that fail to decode are skipped;
    /// `None` means the channel is closed or the bus is gone.
    pub async fn recv(&mut self) -> Option<SignalMessage> {
        let sub = self.sub.as_mut()?;

        loop {
            let frame = sub.recv().await?;
            match SignalMessage::from_bytes(&frame.data) {
                Ok(msg) if msg.sender == self.identity => continue,
                Ok(msg) => {
                    debug!(
                        session = %self.session_id,
                        kind = msg.payload.kind(),
                        from = %msg.sender.short(),
                        "received signal"
                    );
                    return Some(msg);
                }
                Err(e) => {
                    warn!(session = %self.session_id, error = %e, "dropping malformed signal frame");
                    continue;
                }
            }
        }
    }

    /// Release the subscription. Safe to call multiple times.
    pub fn close(&mut self) {
        if self.sub.take().is_some() {
            debug!(session = %self.session_id, "signaling channel closed");
        }
    }
}
