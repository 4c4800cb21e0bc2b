use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::{ConfigError, RemoteError};
use crate::security::Credentials;
use crate::types::DataPoint;

/// The four operations the sync engine needs from the remote service.
/// Implementations hold credentials but no other state between calls.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Liveness and authentication check.
    async fn ping(&self) -> Result<(), RemoteError>;

    async fn stream_exists(&self, stream: &str) -> Result<bool, RemoteError>;

    async fn create_stream(&self, stream: &str, schema: &str) -> Result<(), RemoteError>;

    /// Insert a batch of points, ascending by `t`.
    async fn insert_batch(&self, stream: &str, points: &[DataPoint]) -> Result<(), RemoteError>;
}

/// Builds a client for one pass from the credentials stored in the cache.
pub trait RemoteConnector: Send + Sync {
    fn connect(&self, credentials: &Credentials) -> Result<Arc<dyn RemoteClient>, ConfigError>;
}
