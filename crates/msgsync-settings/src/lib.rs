//! # msgsync-settings
//!
//! Persisted configuration for the sync agent: a JSON file deep-merged over
//! compiled defaults, with environment variable overrides on top. The file
//! also persists the sync cursor (`last_message_rowid`) so a restart resumes
//! from the last forwarded position.

#![deny(unsafe_code)]

mod errors;
mod loader;
mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    deep_merge, load_settings, load_settings_from_path, parse_bool, parse_u64_range,
};
pub use types::{Settings, config_dir, failure_log_path, settings_path};
