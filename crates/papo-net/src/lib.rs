// Matchmaking and signaling over a channel-addressed pub/sub bus.

pub mod bus;
pub mod lobby;
pub mod signaling;

mod error;

pub use bus::{spawn_memory_bus, BusCommand, BusHandle, BusMessage, Subscription};
pub use error::NetError;
pub use lobby::{Lobby, Match, SeekOutcome};
pub use signaling::SignalingChannel;
