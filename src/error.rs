//! Error types and handling for the tunnel provider layer

use thiserror::Error;

/// Main error type for provider operations
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// `start` was called while the tunnel is already active
    #[error("Tunnel already active")]
    AlreadyActive,

    /// A command that requires an active tunnel arrived while inactive
    #[error("Tunnel inactive")]
    Inactive,

    /// `start` was aborted before touching the engine (debug/dry-run flag)
    #[error("Start aborted: {0}")]
    StartAborted(String),

    /// The engine answered a command with an error code
    #[error("Engine command failed: {0}")]
    Command(String),

    /// The engine never answered a command (callback dropped, engine gone)
    #[error("Engine unreachable: {0}")]
    EngineUnreachable(String),

    /// Applying network settings through the host framework failed
    #[error("Applying network settings failed: {0}")]
    NetworkSettings(String),

    /// Malformed commands or unknown message shapes
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// JSON errors at the command boundary
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Timeout errors
    #[error("Operation timed out")]
    Timeout,

    /// Other errors
    #[error("Other error: {0}")]
    Other(String),
}

/// Result type alias for provider operations
pub type Result<T> = std::result::Result<T, ProviderError>;

impl ProviderError {
    /// Wire representation of this error.
    ///
    /// Errors cross the command boundary as plain string codes so that they
    /// survive JSON round trips; frontends branch on the code, not on the
    /// message. Engine-originated codes are relayed unmodified.
    pub fn code(&self) -> &str {
        match self {
            ProviderError::AlreadyActive => "tunnelAlreadyActive",
            ProviderError::Inactive => "tunnelInactive",
            ProviderError::Command(code) => code,
            ProviderError::EngineUnreachable(_) => "engineUnreachable",
            ProviderError::Protocol(_) | ProviderError::Json(_) => "protocolError",
            ProviderError::Timeout => "timeout",
            _ => "other",
        }
    }
}

impl From<toml::de::Error> for ProviderError {
    fn from(err: toml::de::Error) -> Self {
        ProviderError::Config(format!("TOML parsing error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProviderError::Config("test config error".to_string());
        assert_eq!(err.to_string(), "Configuration error: test config error");
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(ProviderError::AlreadyActive.code(), "tunnelAlreadyActive");
        assert_eq!(ProviderError::Inactive.code(), "tunnelInactive");
        assert_eq!(
            ProviderError::Command("apiUnreachable".to_string()).code(),
            "apiUnreachable"
        );
        assert_eq!(
            ProviderError::Protocol("bad shape".to_string()).code(),
            "protocolError"
        );
    }

    #[test]
    fn test_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ProviderError = io_err.into();
        assert!(matches!(err, ProviderError::Io(_)));
    }
}
