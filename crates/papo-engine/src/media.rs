//! Media/pipeline provider boundary.
//!
//! The engine never touches codecs or ICE internals; it drives an opaque
//! pipeline through these traits and reacts to the event stream the provider
//! hands back. Pipeline events arrive on a plain mpsc receiver so the
//! controller can fold them into its single select loop.

use thiserror::Error;
use tokio::sync::mpsc;

use papo_shared::Role;

/// Local media acquisition failures. Reported upward, never fatal: the user
/// may fix permissions and retry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("Camera/microphone permission denied")]
    PermissionDenied,

    #[error("No camera or microphone found")]
    DeviceNotFound,

    #[error("Media error: {0}")]
    Other(String),
}

/// Capture constraints passed to the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaConstraints {
    pub video: bool,
    pub audio: bool,
    pub ideal_width: u32,
    pub ideal_height: u32,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            video: true,
            audio: true,
            ideal_width: 1280,
            ideal_height: 720,
        }
    }
}

/// Opaque handle to an acquired local capture source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalMedia {
    /// Provider-defined token identifying the source.
    pub token: String,
}

/// Connection state reported by the underlying peer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Events emitted by a live pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    StateChanged(PipelineState),
    /// Locally gathered connectivity candidate, to be relayed to the peer.
    LocalCandidate(String),
    /// A remote media track became available.
    RemoteTrack { track_id: String },
    /// The direct data channel became writable.
    DataChannelOpen,
    /// Text frame received on the direct data channel.
    DataChannelText(String),
}

/// The direct data path is not (or no longer) writable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Data channel is not writable")]
pub struct DataChannelClosed;

/// External provider of capture sources and peer sessions.
pub trait MediaProvider: Send + Sync + 'static {
    /// Acquire the local audio/video source.
    fn acquire_local_media(&self, constraints: &MediaConstraints) -> Result<LocalMedia, MediaError>;

    /// Create a peer session for one matched conversation.
    ///
    /// The initiator's pipeline owns the data channel creation; the
    /// responder's waits for it, per standard session-establishment
    /// symmetry-breaking.
    fn create_pipeline(
        &self,
        role: Role,
        local: &LocalMedia,
    ) -> Result<(Box<dyn MediaPipeline>, mpsc::Receiver<PipelineEvent>), MediaError>;
}

/// One live peer session, owned exclusively by the controller.
pub trait MediaPipeline: Send {
    fn create_offer(&mut self) -> Result<String, MediaError>;

    /// Apply the remote offer and produce the answer in one step.
    fn create_answer(&mut self, remote_offer: &str) -> Result<String, MediaError>;

    fn set_remote_answer(&mut self, sdp: &str) -> Result<(), MediaError>;

    /// Add a relayed connectivity candidate. Must tolerate duplicates and
    /// out-of-order arrival.
    fn add_remote_candidate(&mut self, candidate: &str) -> Result<(), MediaError>;

    /// Whether the direct data path can take a frame right now.
    fn data_channel_writable(&self) -> bool;

    /// Send a text frame on the direct data path.
    fn send_text(&mut self, text: &str) -> Result<(), DataChannelClosed>;

    /// Release the session. Further calls are no-ops.
    fn close(&mut self);
}
