//! # venue-settings
//!
//! Configuration for the venue coordination server, loaded in layers
//! (lowest to highest priority):
//! 1. **Compiled defaults**: [`VenueSettings::default()`]
//! 2. **Settings file**: `$VENUE_CONFIG` or `./venue.json`, deep-merged
//! 3. **Environment variables**: `VENUE_*` overrides
//!
//! The binary applies its CLI flags on top of the result.

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides, deep_merge, load_settings_from_path, settings_path,
};
pub use types::*;
