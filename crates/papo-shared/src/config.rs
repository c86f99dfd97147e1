//! Engine timing configuration.
//!
//! All knobs default to the production values in [`crate::constants`]; tests
//! shrink them to keep timer-driven paths fast.

use std::time::Duration;

use crate::constants;

/// Timing configuration for one engine instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Presence TTL: records with `last_seen` older than this are excluded
    /// from online queries. Default: 120 s.
    pub presence_ttl: Duration,

    /// Heartbeat refresh interval. Default: 30 s.
    pub heartbeat_interval: Duration,

    /// Online-directory re-poll interval. Default: 10 s.
    pub presence_poll_interval: Duration,

    /// Seeking re-announcement interval while in the lobby. Default: 2 s.
    pub lobby_announce_interval: Duration,

    /// Bounded search window before the lobby reports a timeout.
    /// Default: 60 s.
    pub search_window: Duration,

    /// Pending-offer retry interval until `ready`/`answer`. Default: 2 s.
    pub offer_retry_interval: Duration,

    /// Delay before automatically retrying a timed-out search. Default: 2 s.
    pub search_retry_delay: Duration,

    /// Grace delay before auto-requeue after peer loss. Default: 1.5 s.
    /// Kept shorter than `search_retry_delay`.
    pub requeue_grace: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            presence_ttl: constants::PRESENCE_TTL,
            heartbeat_interval: constants::HEARTBEAT_INTERVAL,
            presence_poll_interval: constants::PRESENCE_POLL_INTERVAL,
            lobby_announce_interval: constants::LOBBY_ANNOUNCE_INTERVAL,
            search_window: constants::SEARCH_WINDOW,
            offer_retry_interval: constants::OFFER_RETRY_INTERVAL,
            search_retry_delay: constants::SEARCH_RETRY_DELAY,
            requeue_grace: constants::REQUEUE_GRACE,
        }
    }
}

impl EngineConfig {
    /// Config with all delays compressed to a few milliseconds.
    ///
    /// Used by timer-sensitive tests; keeps the relative ordering of the
    /// delays (requeue grace < search retry) intact.
    pub fn fast() -> Self {
        Self {
            presence_ttl: Duration::from_millis(500),
            heartbeat_interval: Duration::from_millis(100),
            presence_poll_interval: Duration::from_millis(50),
            lobby_announce_interval: Duration::from_millis(20),
            search_window: Duration::from_millis(400),
            offer_retry_interval: Duration::from_millis(25),
            search_retry_delay: Duration::from_millis(40),
            requeue_grace: Duration::from_millis(20),
        }
    }
}
