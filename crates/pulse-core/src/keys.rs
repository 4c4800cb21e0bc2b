//! Well-known keys of the KV store.

/// Keys starting with this marker hold secrets and are redacted in logs.
pub const PRIVATE_PREFIX: &str = "__";

pub const SERVER: &str = "server";
pub const DEVICE_IDENTITY: &str = "device_identity";
pub const API_KEY: &str = "__api_key";
/// Scheduled sync period in milliseconds.
pub const SYNC_PERIOD: &str = "sync_period";
/// "1" when scheduled sync is enabled, "0" otherwise.
pub const SYNC_ENABLED: &str = "sync_enabled";
/// RFC 3339 time of the last fully successful pass.
pub const LAST_SYNC: &str = "last_sync";

pub const CHECKPOINT_PREFIX: &str = "sync_checkpoint_";

pub const DEFAULT_SERVER: &str = "http://localhost:8000";
/// One hour.
pub const DEFAULT_SYNC_PERIOD_MS: i64 = 3_600_000;

/// Values seeded into a fresh store. Existing values are never overwritten.
pub const DEFAULTS: &[(&str, &str)] = &[
    (SERVER, DEFAULT_SERVER),
    (DEVICE_IDENTITY, ""),
    (API_KEY, ""),
    (SYNC_PERIOD, "3600000"),
    (SYNC_ENABLED, "0"),
];

pub fn checkpoint_key(stream: &str) -> String {
    format!("{CHECKPOINT_PREFIX}{stream}")
}

pub fn is_private(key: &str) -> bool {
    key.starts_with(PRIVATE_PREFIX)
}
