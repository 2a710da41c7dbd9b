use thiserror::Error;

/// Core error types for toxiwarden operations
#[derive(Error, Debug)]
pub enum WardenError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Failed to spawn {command}: {reason}")]
    Spawn { command: String, reason: String },

    #[error("Toxiproxy server unreachable: {0}")]
    Unreachable(String),

    #[error("Toxiproxy server responded with {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Unexpected response from toxiproxy server: {0}")]
    Decode(String),

    #[error("Toxiproxy server is not running")]
    Unavailable,

    #[error("Command failed: {0}")]
    Command(String),
}

impl WardenError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    pub fn spawn(command: impl Into<String>, reason: impl ToString) -> Self {
        Self::Spawn {
            command: command.into(),
            reason: reason.to_string(),
        }
    }

    pub fn unreachable(message: impl ToString) -> Self {
        Self::Unreachable(message.to_string())
    }

    /// Check if this error is worth retrying (the server may come back)
    pub fn is_retryable(&self) -> bool {
        matches!(self, WardenError::Unreachable(_) | WardenError::Unavailable)
    }

    /// Check if this error indicates a permanent failure
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            WardenError::Configuration(_) | WardenError::InvalidRequest(_)
        )
    }

    /// HTTP status code the control API should answer with for this error
    pub fn status_code(&self) -> u16 {
        match self {
            WardenError::InvalidRequest(_) => 400,
            WardenError::Http { status, .. } => *status,
            WardenError::Unavailable => 503,
            WardenError::Unreachable(_) | WardenError::Decode(_) => 502,
            _ => 500,
        }
    }
}
