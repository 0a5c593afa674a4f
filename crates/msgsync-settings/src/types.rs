//! The settings schema and well-known paths.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::Result;

/// Application settings, persisted as JSON.
///
/// `last_message_rowid` is the sync cursor: the highest store position
/// already forwarded to the remote endpoint. It is advanced only after a
/// batch was successfully handed to the network layer, and saved before the
/// next read, so a crash re-sends at most the last unacknowledged batch.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// WebSocket endpoint of the remote counterpart.
    pub websocket_url: String,
    /// Path to the local message store.
    pub db_path: PathBuf,
    /// Permanent attachments directory, searched when a recorded attachment
    /// path has gone stale.
    pub attachments_dir: PathBuf,
    /// Use filesystem notifications for change detection; when false (or
    /// when the watcher fails to start) the agent polls instead.
    pub use_file_watcher: bool,
    /// Quiet interval before a burst of store changes collapses into one
    /// fetch, in milliseconds.
    pub debounce_ms: u64,
    /// Polling interval when running without the watcher, in milliseconds.
    pub poll_interval_ms: u64,
    /// Maximum records fetched and pushed per change signal.
    pub batch_limit: usize,
    /// Sync cursor: highest position already forwarded.
    pub last_message_rowid: i64,
}

impl Default for Settings {
    fn default() -> Self {
        let library = home_dir().join("Library").join("Messages");
        Self {
            websocket_url: "ws://localhost:2999/messages-sync".to_string(),
            db_path: library.join("chat.db"),
            attachments_dir: library.join("Attachments"),
            use_file_watcher: true,
            debounce_ms: 100,
            poll_interval_ms: 1000,
            batch_limit: 50,
            last_message_rowid: 0,
        }
    }
}

impl Settings {
    /// Write the settings as pretty JSON to `path`, creating parent
    /// directories as needed.
    pub fn save_to_path(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Write the settings to the default location.
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&settings_path())
    }
}

/// The agent's configuration directory (`~/.msgsync`).
pub fn config_dir() -> PathBuf {
    home_dir().join(".msgsync")
}

/// Path of the settings file (`~/.msgsync/settings.json`).
pub fn settings_path() -> PathBuf {
    config_dir().join("settings.json")
}

/// Path of the attachment failure audit log
/// (`~/.msgsync/logs/failed_attachments.log`).
pub fn failure_log_path() -> PathBuf {
    config_dir().join("logs").join("failed_attachments.log")
}

fn home_dir() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let settings = Settings::default();
        assert_eq!(settings.websocket_url, "ws://localhost:2999/messages-sync");
        assert!(settings.use_file_watcher);
        assert_eq!(settings.debounce_ms, 100);
        assert_eq!(settings.poll_interval_ms, 1000);
        assert_eq!(settings.batch_limit, 50);
        assert_eq!(settings.last_message_rowid, 0);
        assert!(settings.db_path.ends_with("chat.db"));
    }

    #[test]
    fn save_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        Settings::default().save_to_path(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn save_roundtrips_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let settings = Settings {
            last_message_rowid: 1234,
            ..Settings::default()
        };
        settings.save_to_path(&path).unwrap();

        let loaded: Settings =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded.last_message_rowid, 1234);
    }

    #[test]
    fn paths_under_config_dir() {
        assert!(settings_path().starts_with(config_dir()));
        assert!(failure_log_path().starts_with(config_dir()));
    }
}
