use rusqlite::OptionalExtension;
use tracing::{debug, instrument};

use pulse_core::keys;
use pulse_core::security::redact_value;

use crate::database::Database;
use crate::error::StoreError;

/// Durable string-to-string settings store.
///
/// Absent keys read as the empty string. Values under private keys
/// (see [`keys::PRIVATE_PREFIX`]) never reach the logs.
#[derive(Clone)]
pub struct KvStore {
    db: Database,
}

impl KvStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Get a value, or `""` when the key was never set.
    #[instrument(skip(self))]
    pub fn get(&self, key: &str) -> Result<String, StoreError> {
        let value = self.db.with_conn(|conn| {
            conn.query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| {
                row.get::<_, String>(0)
            })
            .optional()
            .map_err(StoreError::from)
        })?;
        let value = value.unwrap_or_default();
        debug!(key, value = redact_value(key, &value), "kv get");
        Ok(value)
    }

    /// Replace the value of a key.
    #[instrument(skip(self, value))]
    pub fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        debug!(key, value = redact_value(key, value), "kv set");
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                [key, value],
            )?;
            Ok(())
        })
    }

    /// Parse a numeric setting, falling back when absent or malformed.
    pub fn get_i64_or(&self, key: &str, fallback: i64) -> Result<i64, StoreError> {
        Ok(self.get(key)?.trim().parse().unwrap_or(fallback))
    }

    /// Sync checkpoint of a stream. `None` when no pass ever committed data
    /// for it, or when the stored value is not a finite number.
    pub fn checkpoint(&self, stream: &str) -> Result<Option<f64>, StoreError> {
        Ok(parse_checkpoint(&self.get(&keys::checkpoint_key(stream))?))
    }

    /// Move a stream's checkpoint forward. Never moves it backwards: the
    /// comparison and the write happen under the same lock.
    #[instrument(skip(self))]
    pub fn advance_checkpoint(&self, stream: &str, timestamp: f64) -> Result<f64, StoreError> {
        if !timestamp.is_finite() {
            return Err(StoreError::InvalidTimestamp(timestamp));
        }
        let key = keys::checkpoint_key(stream);
        self.db.with_conn(|conn| {
            let current: Option<String> = conn
                .query_row("SELECT value FROM kv WHERE key = ?1", [&key], |row| row.get(0))
                .optional()?;
            let current = current.as_deref().and_then(parse_checkpoint);

            match current {
                Some(existing) if existing >= timestamp => Ok(existing),
                _ => {
                    conn.execute(
                        "INSERT INTO kv (key, value) VALUES (?1, ?2)
                         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                        [key.as_str(), timestamp.to_string().as_str()],
                    )?;
                    Ok(timestamp)
                }
            }
        })
    }
}

fn parse_checkpoint(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|t| t.is_finite())
}
