use thiserror::Error;

/// Errors surfaced through the engine handle.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The controller task has stopped; the handle is stale.
    #[error("Engine is no longer running")]
    Closed,
}
