use pulse_core::errors::{ConfigError, RemoteError};
use pulse_store::StoreError;

/// Why a sync pass did not complete.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Credentials or server in the KV store are unusable. Not retried until
    /// they change.
    #[error("sync configuration: {0}")]
    Config(#[from] ConfigError),

    /// A remote call failed. `stream` is `None` for the liveness check.
    #[error("remote call failed{}: {source}", .stream.as_deref().map(|s| format!(" for stream {s}")).unwrap_or_default())]
    Remote {
        stream: Option<String>,
        #[source]
        source: RemoteError,
    },

    #[error("local store: {0}")]
    Store(#[from] StoreError),
}

impl SyncError {
    pub(crate) fn remote(stream: &str) -> impl FnOnce(RemoteError) -> Self + '_ {
        move |source| Self::Remote {
            stream: Some(stream.to_string()),
            source,
        }
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Remote { source, .. } => source.error_kind(),
            Self::Store(_) => "store",
        }
    }

    /// Whether a later pass can succeed without intervention.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Remote { .. })
    }
}
