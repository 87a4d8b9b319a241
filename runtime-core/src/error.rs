//! Error types for the percept runtime core

use thiserror::Error;

/// Result type alias for percept runtime core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the percept runtime core
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or missing configuration (fatal to the owning Init)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Manifest parsing or validation error
    #[error("Manifest error: {0}")]
    Manifest(String),

    /// Algorithm plugin key was never registered (fatal to Init)
    #[error("Plugin not found: '{key}'. Registered plugins: {available:?}")]
    PluginNotFound {
        /// The unresolved lookup key
        key: String,
        /// Keys that are registered
        available: Vec<String>,
    },

    /// A channel name was bound to a different payload type earlier in the process
    #[error("Channel '{channel}' carries '{expected}', not '{actual}'")]
    ChannelTypeMismatch {
        /// Channel name
        channel: String,
        /// Payload type the channel was first bound with
        expected: String,
        /// Payload type requested by the caller
        actual: String,
    },

    /// An algorithm or task failed while handling a single message
    /// (non-fatal to the owning component)
    #[error("Processing error: {0}")]
    Process(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parse error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Other(err.to_string())
    }
}
