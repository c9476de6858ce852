use thiserror::Error;

/// Errors surfaced by the session engine.
///
/// Only `InputUnavailable` and `Config` block `start()`; gateway failures
/// degrade detection without touching the timer, and persistence failures are
/// reported while in-memory state stays authoritative.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no capture device is configured")]
    InputUnavailable,

    #[error("invalid session config: {0}")]
    Config(String),

    #[error("persistence failure: {0}")]
    Persistence(#[source] anyhow::Error),
}
