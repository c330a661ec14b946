//! # cashy-settings
//!
//! Configuration for opening a cashy store.
//!
//! Settings are layered (lowest to highest priority):
//! 1. **Compiled defaults**: [`StoreSettings::default()`]
//! 2. **Settings file**: `~/.cashy/settings.json`, laid key by key over defaults
//! 3. **Environment**: `CASHY_*` overrides
//!
//! The required major identifier is not configurable from the
//! environment: it names the file family and is fixed by the embedding crate.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{load_settings, load_settings_from_path, overlay_file, settings_path};
pub use types::StoreSettings;
