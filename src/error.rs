//! Error types for cachegate.

use thiserror::Error;

/// Errors produced by the proxy, cache engine and configuration layer.
#[derive(Debug, Error)]
pub enum GateError {
    /// Configuration could not be loaded or failed validation.
    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The origin could not be reached or returned an unreadable response.
    #[error("origin error: {0}")]
    Origin(String),

    /// The origin did not answer within the configured timeout.
    #[error("origin timed out after {0}s")]
    OriginTimeout(u64),

    /// The inbound request cannot be forwarded as-is.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

pub type Result<T> = std::result::Result<T, GateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(
            GateError::Config("port must be non-zero".into()).to_string(),
            "config error: port must be non-zero"
        );
        assert_eq!(
            GateError::OriginTimeout(30).to_string(),
            "origin timed out after 30s"
        );
    }

    #[test]
    fn test_io_error_converts() {
        fn open() -> Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"))?;
            Ok(())
        }
        assert!(matches!(open(), Err(GateError::Io(_))));
    }
}
