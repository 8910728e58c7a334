use thiserror::Error;

/// Result type used throughout the crate.
pub type DialogResult<T> = Result<T, DialogError>;

/// Errors returned by dialog and subscription operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DialogError {
    /// A message that cannot be handled as asked
    #[error("Protocol error: {message}")]
    ProtocolError { message: String },

    #[error("Dialog not found: {id}")]
    DialogNotFound { id: String },

    /// The handle refers to a usage that has been destroyed
    #[error("Usage not found: {handle}")]
    UsageNotFound { handle: String },

    /// The application broke a usage contract (for example rejecting with a
    /// 2xx or sending a 2xx without Expires)
    #[error("Usage misuse: {message}")]
    UsageUse { message: String },

    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Internal error: {message}")]
    InternalError { message: String },
}

impl DialogError {
    pub fn protocol_error(message: &str) -> Self {
        Self::ProtocolError {
            message: message.to_string(),
        }
    }

    pub fn dialog_not_found(id: impl ToString) -> Self {
        Self::DialogNotFound { id: id.to_string() }
    }

    pub fn usage_not_found(handle: impl ToString) -> Self {
        Self::UsageNotFound {
            handle: handle.to_string(),
        }
    }

    pub fn usage_use(message: &str) -> Self {
        Self::UsageUse {
            message: message.to_string(),
        }
    }

    pub fn invalid_state(expected: &str, actual: &str) -> Self {
        Self::InvalidState {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    pub fn config_error(message: &str) -> Self {
        Self::ConfigError {
            message: message.to_string(),
        }
    }

    pub fn internal_error(message: &str) -> Self {
        Self::InternalError {
            message: message.to_string(),
        }
    }

    /// True for errors caused by the caller violating an API contract.
    pub fn is_usage_error(&self) -> bool {
        matches!(self, Self::UsageUse { .. })
    }
}
