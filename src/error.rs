use thiserror::Error;

/// Which side of the failure taxonomy an error belongs to.
///
/// Every error that leaves a component names its category so callers can
/// decide whether to keep streaming, skip a unit, or tear the session down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// No engine or no committable format; `open()` failed.
    Negotiation,
    /// One packet or one output cycle was lost; the session continues.
    Local,
    /// The engine handle is gone; `close()` and re-`open()` are required.
    Fatal,
    /// The caller misused the API (wrong state, bad property).
    Usage,
}

#[derive(Error, Debug, Clone)]
pub enum BridgeError {
    #[error("no usable engine found: {0}")]
    EngineNotFound(String),

    #[error("format negotiation failed: {0}")]
    Negotiation(String),

    #[error("decode failure: {0}")]
    Decode(String),

    #[error("fatal engine failure: {0}")]
    Fatal(String),

    #[error("operation not valid in state {0}")]
    InvalidState(&'static str),

    #[error("invalid value for property '{key}': {reason}")]
    Config { key: String, reason: String },

    #[error("session closed")]
    SessionClosed,
}

impl BridgeError {
    /// Classifies the error for the caller.
    pub fn category(&self) -> ErrorCategory {
        match self {
            BridgeError::EngineNotFound(_) | BridgeError::Negotiation(_) => {
                ErrorCategory::Negotiation
            }
            BridgeError::Decode(_) => ErrorCategory::Local,
            BridgeError::Fatal(_) | BridgeError::SessionClosed => ErrorCategory::Fatal,
            BridgeError::InvalidState(_) | BridgeError::Config { .. } => ErrorCategory::Usage,
        }
    }

    /// True when the session can keep going after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self.category(), ErrorCategory::Local)
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert_eq!(
            BridgeError::EngineNotFound("h264".into()).category(),
            ErrorCategory::Negotiation
        );
        assert!(BridgeError::Decode("lost frame".into()).is_recoverable());
        assert_eq!(BridgeError::SessionClosed.category(), ErrorCategory::Fatal);
        let config = BridgeError::Config {
            key: "copy".into(),
            reason: "out of range".into(),
        };
        assert_eq!(config.category(), ErrorCategory::Usage);
        assert!(!config.is_recoverable());
        assert_eq!(
            config.to_string(),
            "invalid value for property 'copy': out of range"
        );
    }
}
