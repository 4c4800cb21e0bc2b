use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level settings of a cache process. Keys are camelCase; unknown keys
/// are a parse error.
///
/// Remote settings (server, credentials, sync period) are not here: they live
/// in the cache's own KV store so producers and the scheduler can change them
/// at runtime.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct PulseSettings {
    pub database_path: PathBuf,
    pub sync: SyncSettings,
    pub logging: LoggingSettings,
}

impl Default for PulseSettings {
    fn default() -> Self {
        Self {
            database_path: pulse_home().join("database").join("cache.db"),
            sync: SyncSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

/// What a sync request does when a pass is already running.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapMode {
    /// Remember one pending request and run one more pass afterwards.
    #[default]
    Coalesce,
    /// Drop the request.
    Skip,
}

/// What a pass does when one stream fails remotely.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamFailurePolicy {
    /// Stop the whole pass at the first failing stream.
    #[default]
    AbortPass,
    /// Record the failure and continue with the next stream.
    Isolate,
}

impl std::str::FromStr for OverlapMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "coalesce" => Ok(Self::Coalesce),
            "skip" => Ok(Self::Skip),
            other => Err(format!("unknown overlap mode: {other}")),
        }
    }
}

impl std::str::FromStr for StreamFailurePolicy {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "abort_pass" => Ok(Self::AbortPass),
            "isolate" => Ok(Self::Isolate),
            other => Err(format!("unknown failure policy: {other}")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct SyncSettings {
    pub overlap: OverlapMode,
    pub failure_policy: StreamFailurePolicy,
    /// Upper bound for any single remote call.
    pub call_timeout_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            overlap: OverlapMode::Coalesce,
            failure_policy: StreamFailurePolicy::AbortPass,
            call_timeout_ms: 120_000,
            connect_timeout_ms: 30_000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct LoggingSettings {
    /// Default level; `RUST_LOG` takes precedence.
    pub level: String,
    /// Persist WARN and ERROR records to a SQLite log database.
    pub persist_warnings: bool,
    pub db_path: PathBuf,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            persist_warnings: true,
            db_path: pulse_home().join("database").join("logs.db"),
        }
    }
}

/// `~/.pulse`, or `/tmp/.pulse` without a home directory.
pub fn pulse_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".pulse")
}
