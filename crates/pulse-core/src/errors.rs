use std::time::Duration;

/// Configuration problems. Not retried automatically: a pass that hits one of
/// these stops until the configuration is fixed.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("device identity must be `owner/device`, got {0:?}")]
    InvalidIdentity(String),
    #[error("invalid server url {url:?}: {reason}")]
    InvalidServerUrl { url: String, reason: String },
    #[error("http client setup failed: {0}")]
    HttpClient(String),
}

/// Typed error hierarchy for remote operations.
/// The sync engine treats all of them as "this pass failed, try later";
/// the variant only feeds logs.
#[derive(Clone, Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("authentication rejected: {0}")]
    Unauthorized(String),
    #[error("request rejected {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("server error {status}: {body}")]
    ServerError { status: u16, body: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl RemoteError {
    /// Whether retrying on a later pass can plausibly succeed without a
    /// configuration change.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ServerError { .. } | Self::Network(_) | Self::Timeout(_)
        )
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "unauthorized",
            Self::Rejected { .. } => "rejected",
            Self::ServerError { .. } => "server_error",
            Self::Network(_) => "network_error",
            Self::Timeout(_) => "timeout",
            Self::InvalidRequest(_) => "invalid_request",
        }
    }

    /// Classify a non-success HTTP status code.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::Unauthorized(body),
            500..=599 => Self::ServerError { status, body },
            _ => Self::Rejected { status, body },
        }
    }
}
