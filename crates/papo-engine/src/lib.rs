//! # papo-engine
//!
//! The client-side engine for anonymous pairwise video chat: the presence
//! directory agent, the matchmaking/signaling lifecycle controller and the
//! chat plumbing, driven over the papo-net bus and backed by papo-store.
//!
//! The engine is headless. A UI embeds it by spawning the controller
//! ([`spawn_engine`]), feeding it commands through the [`EngineHandle`] and
//! rendering the [`EngineEvent`] stream. Media capture and the peer session
//! itself stay behind the [`MediaProvider`] boundary.

pub mod chat;
pub mod controller;
pub mod media;
pub mod presence;

mod error;
mod storage;

#[cfg(test)]
pub(crate) mod testing;

pub use chat::{ChatLog, ChatMessage, ChatPath};
pub use controller::{
    spawn_engine, ConnectionStatus, EngineCommand, EngineEvent, EngineHandle,
};
pub use error::EngineError;
pub use media::{
    DataChannelClosed, LocalMedia, MediaConstraints, MediaError, MediaPipeline, MediaProvider,
    PipelineEvent, PipelineState,
};
pub use presence::PresenceAgent;

use tracing_subscriber::EnvFilter;

/// Initialise structured logging for binaries embedding the engine.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("papo_engine=debug,papo_net=debug,papo_store=info,warn")
    });

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
