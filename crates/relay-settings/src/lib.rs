//! # relay-settings
//!
//! Layered configuration for the relay.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`RelaySettings::default()`]
//! 2. **Settings file**: `--config`, `RELAY_CONFIG`, or
//!    `~/.relay/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `RELAY_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    deep_merge, load_settings, load_settings_from_path, load_settings_with_env, settings_path,
};
pub use types::{LoggingSettings, RelaySettings, ServerSettings, SessionSettings};
