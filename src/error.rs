/// Error type shared by the request executor, the stream pipeline and the
/// generation service.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Upstream error: status={status}, message={message}")]
    Upstream { status: u16, message: String },
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Broad error category, used by callers to pick a user-facing notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    InvalidRequest,
    Authentication,
    Permission,
    RateLimit,
    ServerError,
    Unknown,
}

impl ErrorCategory {
    /// Short notice suitable for showing to the person who issued the command.
    #[must_use]
    pub fn notice(self) -> &'static str {
        match self {
            ErrorCategory::InvalidRequest => "The request was rejected as invalid.",
            ErrorCategory::Authentication => "The model service rejected our credentials.",
            ErrorCategory::Permission => "Access to this model is not permitted.",
            ErrorCategory::RateLimit => "The model service is busy, try again shortly.",
            ErrorCategory::ServerError => "The model service failed to answer.",
            ErrorCategory::Unknown => "Generation failed for an unknown reason.",
        }
    }
}

/// Map an upstream HTTP status code to an error category.
#[must_use]
pub fn category_from_upstream_status(status: u16) -> ErrorCategory {
    match status {
        400 | 413 => ErrorCategory::InvalidRequest,
        401 => ErrorCategory::Authentication,
        403 => ErrorCategory::Permission,
        429 => ErrorCategory::RateLimit,
        500..=599 => ErrorCategory::ServerError,
        _ => ErrorCategory::Unknown,
    }
}

impl RelayError {
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            RelayError::InvalidRequest(_) => ErrorCategory::InvalidRequest,
            RelayError::Config(_) | RelayError::Transport(_) | RelayError::Internal(_) => {
                ErrorCategory::ServerError
            }
            RelayError::Upstream { status, .. } => category_from_upstream_status(*status),
        }
    }

    /// Whether this error ended a generation at the transport level (network
    /// failure or a non-recoverable upstream status).
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, RelayError::Transport(_) | RelayError::Upstream { .. })
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(err: reqwest::Error) -> Self {
        RelayError::Transport(err.to_string())
    }
}

/// Error returned by progress sinks. Always caught and logged by the caller.
pub type SinkError = Box<dyn std::error::Error + Send + Sync>;
