//! Error types for the Setu gateway

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Setu gateway error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket transport error
    #[error("Transport error: {0}")]
    Transport(#[from] tungstenite::Error),

    /// Inbound frame that cannot be parsed
    #[error("Malformed frame: {0}")]
    MalformedFrame(&'static str),

    /// Outbound frame would grow past the configured limit
    #[error("Frame of {attempted} bytes exceeds the {limit} byte limit")]
    EncodingOverflow {
        /// Size the frame would have reached
        attempted: usize,
        /// Configured maximum frame size
        limit: usize,
    },

    /// Host payload decode failure
    #[error("Payload decode error: {0}")]
    Decode(String),

    /// Configuration file parse error
    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Invalid configuration value or usage
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}
