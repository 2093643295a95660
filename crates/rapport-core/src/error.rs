use thiserror::Error;

/// Top-level error type for the engagement engine.
///
/// Nothing in this taxonomy is fatal: completion failures fall back to
/// templated replies, storage failures degrade to ephemeral state, and
/// adaptation failures skip the offending step.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The completion capability failed or timed out.
    #[error("completion unavailable: {0}")]
    Completion(String),

    /// Error from the outbound messaging channel.
    #[error("channel error: {0}")]
    Channel(String),

    /// Persistent storage failed.
    #[error("storage unavailable: {0}")]
    Storage(String),

    /// A single adaptation step failed; the pipeline continues without it.
    #[error("adaptation step failed: {0}")]
    Adaptation(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
