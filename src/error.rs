//! Error types for the math rendering pipeline

use thiserror::Error;

/// Result type alias for rendering operations
pub type Result<T> = std::result::Result<T, Error>;

/// Markup that the typesetting engine refused to typeset.
///
/// `position` is the character offset reported by the engine, when it
/// reports one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ParseError {
    pub message: String,
    pub position: Option<usize>,
}

impl ParseError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            position: None,
        }
    }

    pub fn at(message: impl Into<String>, position: usize) -> Self {
        Self {
            message: message.into(),
            position: Some(position),
        }
    }
}

/// Errors that can occur while rendering markup
#[derive(Error, Debug)]
pub enum Error {
    /// Template resource missing or malformed (fatal at initialization)
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Markup cannot be typeset
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// The surface failed to load the document
    #[error("Failed to load document: {0}")]
    LoadError(String),

    /// The measurement probe failed or returned something unusable
    #[error("Script execution failed: {0}")]
    ScriptError(String),

    /// Snapshot capture failed
    #[error("Rendering failed: {0}")]
    RenderError(String),

    /// A surface step did not complete in time
    #[error("Operation timed out after {0}ms")]
    Timeout(u64),

    /// The coordinator has been shut down
    #[error("Coordinator is closed")]
    Closed,

    /// CDP-specific error
    #[cfg(feature = "cdp")]
    #[error("CDP error: {0}")]
    CdpError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True for failures raised by the rendering surface (load, measurement,
    /// snapshot, timeout). These are recoverable by issuing a new request.
    pub fn is_surface_error(&self) -> bool {
        match self {
            Error::LoadError(_) | Error::ScriptError(_) | Error::RenderError(_) | Error::Timeout(_) => true,
            #[cfg(feature = "cdp")]
            Error::CdpError(_) => true,
            _ => false,
        }
    }

    /// Human readable message reported through `RenderStatus::Error`.
    ///
    /// Parse errors report the engine's message verbatim.
    pub fn status_message(&self) -> String {
        match self {
            Error::Parse(e) => e.message.clone(),
            other => other.to_string(),
        }
    }
}

#[cfg(feature = "cdp")]
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::CdpError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn surface_errors_are_classified() {
        assert!(Error::LoadError("x".into()).is_surface_error());
        assert!(Error::ScriptError("x".into()).is_surface_error());
        assert!(Error::RenderError("x".into()).is_surface_error());
        assert!(Error::Timeout(10).is_surface_error());
        assert!(!Error::ConfigError("x".into()).is_surface_error());
        assert!(!Error::Parse(ParseError::new("x")).is_surface_error());
    }

    #[test]
    fn parse_error_status_message_is_verbatim() {
        let err = Error::from(ParseError::at("Undefined control sequence: \\foo", 1));
        assert_eq!(err.status_message(), "Undefined control sequence: \\foo");
        assert_eq!(Error::Timeout(250).status_message(), "Operation timed out after 250ms");
    }
}
