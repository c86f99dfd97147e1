use thiserror::Error;

/// Errors produced by the networking layer.
#[derive(Error, Debug)]
pub enum NetError {
    /// The bus task is gone; no further publishes or subscribes can succeed.
    #[error("Bus command channel closed")]
    BusClosed,

    /// Send attempted on a signaling channel that was already closed.
    #[error("Signaling channel closed")]
    SignalingClosed,

    /// Wire frame could not be encoded.
    #[error(transparent)]
    Protocol(#[from] papo_shared::ProtocolError),
}
