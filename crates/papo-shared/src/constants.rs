use std::time::Duration;

/// Shared lobby topic every seeker announces on.
pub const LOBBY_TOPIC: &str = "matchmaking-lobby";

/// Prefix of per-session signaling topics (`signal:<session-uuid>`).
pub const SIGNALING_TOPIC_PREFIX: &str = "signal:";

/// Presence records older than this are treated as stale even before they
/// are physically deleted.
pub const PRESENCE_TTL: Duration = Duration::from_secs(120);

/// Interval between `last_seen` heartbeat refreshes.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Interval between online-directory re-polls (push delivery is not assumed).
pub const PRESENCE_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Interval between re-broadcasts of a seeking announcement while searching.
pub const LOBBY_ANNOUNCE_INTERVAL: Duration = Duration::from_secs(2);

/// Bounded search window; the lobby reports a timeout past this.
pub const SEARCH_WINDOW: Duration = Duration::from_secs(60);

/// Interval between re-sends of a pending offer until `ready` or `answer`.
pub const OFFER_RETRY_INTERVAL: Duration = Duration::from_secs(2);

/// Delay before re-entering the lobby after a search timeout.
pub const SEARCH_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Grace delay before auto-requeueing after an unplanned peer loss.
/// Deliberately shorter than [`SEARCH_RETRY_DELAY`]: peer loss recovers
/// faster than a full search-timeout cycle.
pub const REQUEUE_GRACE: Duration = Duration::from_millis(1500);

/// Maximum length of the `last_message` preview stored per conversation.
pub const LAST_MESSAGE_PREVIEW_LEN: usize = 200;
