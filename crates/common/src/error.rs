//! Error types for Playtest

use thiserror::Error;

/// Result type alias using Playtest Error
pub type Result<T> = std::result::Result<T, Error>;

/// Playtest error types
///
/// Failures fall into two tiers: connectivity errors (the peer is
/// unreachable or timed out) are fatal to the call that produced them
/// and propagate unchanged; application errors (a well-formed response
/// carrying a failure status) are recoverable and feed the step
/// retry/fallback logic.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Connectivity error: {0}")]
    Connectivity(String),

    #[error("Application error: {0}")]
    Application(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Perception error: {0}")]
    Perception(String),

    #[error("Image error: {0}")]
    Image(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for transport-level failures (peer unreachable, timeout).
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Error::Connectivity(_))
    }
}
