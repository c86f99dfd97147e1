//! Matchmaking lobby: rendezvous without a central queue.
//!
//! Every seeker announces itself on the shared lobby topic and listens for
//! other announcements. When two seekers discover each other, the identity
//! order breaks the symmetry: the strictly lower identity elects itself
//! initiator, mints the session id and publishes the one and only
//! [`LobbyMessage::MatchProposal`] naming both parties. The higher identity
//! never self-assigns; it matches only by receiving a proposal addressed to
//! it. This guarantees exactly one pairing per pair of concurrent seekers.

use chrono::Utc;
use tracing::{debug, info, warn};

use papo_shared::protocol::LobbyMessage;
use papo_shared::{EngineConfig, Identity, Role, SessionId};

use crate::bus::BusHandle;
use crate::error::NetError;

use std::time::Duration;

/// A resolved pairing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    pub session_id: SessionId,
    pub role: Role,
    pub peer: Identity,
}

/// Result of one bounded search attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeekOutcome {
    Matched(Match),
    /// Nobody paired with us inside the search window. Retry policy belongs
    /// to the caller.
    TimedOut,
}

/// One participant's view of the matchmaking lobby.
pub struct Lobby {
    bus: BusHandle,
    identity: Identity,
    announce_interval: Duration,
    search_window: Duration,
}

impl Lobby {
    pub fn new(bus: BusHandle, identity: Identity, config: &EngineConfig) -> Self {
        Self {
            bus,
            identity,
            announce_interval: config.lobby_announce_interval,
            search_window: config.search_window,
        }
    }

    /// Search for a partner until matched or the search window elapses.
    ///
    /// Cancellation-safe: dropping the future leaves the lobby (the
    /// subscription is released on drop), so no stale announcements outlive
    /// the caller.
    pub async fn seek(&self) -> Result<SeekOutcome, NetError> {
        let mut sub = self.bus.subscribe(papo_shared::constants::LOBBY_TOPIC).await?;

        info!(identity = %self.identity.short(), "joined matchmaking lobby");

        let mut announce = tokio::time::interval(self.announce_interval);
        let deadline = tokio::time::sleep(self.search_window);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                () = &mut deadline => {
                    debug!(identity = %self.identity.short(), "search window elapsed");
                    return Ok(SeekOutcome::TimedOut);
                }

                // First tick fires immediately: the initial announcement goes
                // out as soon as the subscription is open.
                _ = announce.tick() => {
                    let msg = LobbyMessage::Seeking {
                        identity: self.identity.clone(),
                        sent_at: Utc::now(),
                    };
                    sub.publish(msg.to_bytes()?).await?;
                }

                frame = sub.recv() => {
                    let Some(frame) = frame else {
                        return Err(NetError::BusClosed);
                    };
                    let msg = match LobbyMessage::from_bytes(&frame.data) {
                        Ok(msg) => msg,
                        Err(e) => {
                            warn!(error = %e, "dropping malformed lobby frame");
                            continue;
                        }
                    };
                    if let Some(outcome) = self.handle_lobby_message(&sub, msg).await? {
                        return Ok(SeekOutcome::Matched(outcome));
                    }
                }
            }
        }
    }

    async fn handle_lobby_message(
        &self,
        sub: &crate::bus::Subscription,
        msg: LobbyMessage,
    ) -> Result<Option<Match>, NetError> {
        match msg {
            LobbyMessage::Seeking { identity: other, .. } => {
                // The bus self-filters, but a replayed frame could still
                // carry our own identity.
                if other == self.identity {
                    return Ok(None);
                }

                if self.identity < other {
                    // We sort lower: elect ourselves initiator and publish
                    // the single proposal for this pair.
                    let session_id = SessionId::new();
                    info!(
                        session = %session_id,
                        peer = %other.short(),
                        "proposing match as initiator"
                    );

                    let proposal = LobbyMessage::MatchProposal {
                        session_id,
                        initiator: self.identity.clone(),
                        responder: other.clone(),
                    };
                    sub.publish(proposal.to_bytes()?).await?;

                    Ok(Some(Match {
                        session_id,
                        role: Role::Initiator,
                        peer: other,
                    }))
                } else {
                    // Higher identity waits for the proposal instead of
                    // self-assigning; this is what prevents double-proposals.
                    debug!(peer = %other.short(), "seen lower-priority seeker, awaiting proposal");
                    Ok(None)
                }
            }

            LobbyMessage::MatchProposal {
                session_id,
                initiator,
                responder,
            } => {
                if responder != self.identity {
                    return Ok(None);
                }

                info!(
                    session = %session_id,
                    peer = %initiator.short(),
                    "accepted match proposal as responder"
                );

                Ok(Some(Match {
                    session_id,
                    role: Role::Responder,
                    peer: initiator,
                }))
            }
        }
    }
}
