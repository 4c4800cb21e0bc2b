use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::errors::{Result, SettingsError};
use crate::types::{pulse_home, PulseSettings};

pub const ENV_DATABASE_PATH: &str = "PULSE_DATABASE_PATH";
pub const ENV_LOG_LEVEL: &str = "PULSE_LOG_LEVEL";
pub const ENV_SYNC_OVERLAP: &str = "PULSE_SYNC_OVERLAP";
pub const ENV_SYNC_FAILURE_POLICY: &str = "PULSE_SYNC_FAILURE_POLICY";
pub const ENV_SYNC_CALL_TIMEOUT_MS: &str = "PULSE_SYNC_CALL_TIMEOUT_MS";

/// Default location of the settings file.
pub fn settings_path() -> PathBuf {
    pulse_home().join("settings.json")
}

/// Load settings from the default path with env overrides.
pub fn load_settings() -> Result<PulseSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings: compiled defaults, deep-merged with the file at `path` when
/// it exists, then `PULSE_*` environment overrides.
pub fn load_settings_from_path(path: &Path) -> Result<PulseSettings> {
    let mut settings = read_file_layer(path)?;
    apply_env_overrides(&mut settings, |var| std::env::var(var).ok())?;
    Ok(settings)
}

fn read_file_layer(path: &Path) -> Result<PulseSettings> {
    if !path.exists() {
        tracing::debug!(?path, "no settings file, using defaults");
        return Ok(PulseSettings::default());
    }

    let raw = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
        path: path.to_owned(),
        source,
    })?;
    let parse_err = |source| SettingsError::Parse {
        path: path.to_owned(),
        source,
    };
    let overlay: Value = serde_json::from_str(&raw).map_err(parse_err)?;
    let defaults = serde_json::to_value(PulseSettings::default()).map_err(parse_err)?;
    serde_json::from_value(deep_merge(defaults, overlay)).map_err(parse_err)
}

/// Apply environment overrides. `lookup` is injected so tests stay hermetic.
pub fn apply_env_overrides<F>(settings: &mut PulseSettings, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = lookup(ENV_DATABASE_PATH) {
        settings.database_path = PathBuf::from(path);
    }
    if let Some(level) = lookup(ENV_LOG_LEVEL) {
        settings.logging.level = level;
    }
    if let Some(raw) = lookup(ENV_SYNC_OVERLAP) {
        settings.sync.overlap = raw.parse().map_err(|_| SettingsError::InvalidEnv {
            var: ENV_SYNC_OVERLAP,
            value: raw.clone(),
        })?;
    }
    if let Some(raw) = lookup(ENV_SYNC_FAILURE_POLICY) {
        settings.sync.failure_policy = raw.parse().map_err(|_| SettingsError::InvalidEnv {
            var: ENV_SYNC_FAILURE_POLICY,
            value: raw.clone(),
        })?;
    }
    if let Some(raw) = lookup(ENV_SYNC_CALL_TIMEOUT_MS) {
        settings.sync.call_timeout_ms = raw.parse().map_err(|_| SettingsError::InvalidEnv {
            var: ENV_SYNC_CALL_TIMEOUT_MS,
            value: raw.clone(),
        })?;
    }
    Ok(())
}

/// Recursively merge `overlay` into `base`. Objects merge key by key, any
/// other overlay value replaces the base value.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                let merged = match base.remove(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value,
                };
                base.insert(key, merged);
            }
            Value::Object(base)
        }
        (_, overlay) => overlay,
    }
}
