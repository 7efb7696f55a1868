//! # tether-settings
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** ([`TetherSettings::default()`])
//! 2. **User file** `~/.tether/settings.json` (deep-merged over defaults)
//! 3. **Environment variables** `TETHER_*` (highest priority)

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides_with, deep_merge, load_settings, load_settings_from_path,
    settings_path,
};
pub use types::*;
