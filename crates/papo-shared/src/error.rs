use thiserror::Error;

/// Errors decoding or encoding bus/data-channel frames.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Bincode framing error on a bus message.
    #[error("Frame codec error: {0}")]
    Frame(#[from] bincode::Error),

    /// JSON error on a data-channel frame.
    #[error("Data channel codec error: {0}")]
    Json(#[from] serde_json::Error),
}
