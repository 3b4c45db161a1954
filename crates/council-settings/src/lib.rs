//! # council-settings
//!
//! Layered configuration for the council.
//!
//! Settings are resolved in three layers (later wins):
//! 1. **Compiled defaults**: [`CouncilSettings::default()`]
//! 2. **User file**: `~/.council/settings.json`, deep-merged over defaults
//! 3. **Environment variables**: `COUNCIL_*` overrides
//!
//! ```no_run
//! let settings = council_settings::load_settings().unwrap_or_default();
//! println!("advisor A: {}", settings.advisors.a.endpoint);
//! ```

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_overrides, deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
