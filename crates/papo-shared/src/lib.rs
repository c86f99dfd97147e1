//! # papo-shared
//!
//! Shared vocabulary of the papo matchmaking engine: participant identities,
//! session ids, the bus wire protocol (lobby + signaling messages), tunable
//! constants and the engine configuration struct.

pub mod config;
pub mod constants;
pub mod protocol;
pub mod types;

mod error;

pub use config::EngineConfig;
pub use error::ProtocolError;
pub use types::{ChatSender, Gender, Identity, PresenceStatus, Role, SessionId};
