//! # pulse-settings
//!
//! Process configuration for the cache, loaded from three layers (in priority
//! order):
//! 1. **Compiled defaults**: [`PulseSettings::default()`]
//! 2. **User file**: `~/.pulse/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `PULSE_*` overrides (highest priority)
//!
//! Remote credentials and the sync period are not process settings; they are
//! stored in the cache's KV store and read at the start of every pass.
//!
//! ```no_run
//! let settings = pulse_settings::load_settings().unwrap();
//! println!("cache at {}", settings.database_path.display());
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_env_overrides, deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
