//! Model types for records read from the local store.
//!
//! These are the shapes produced by the store reader — not the wire DTOs
//! (see [`crate::wire`] for those). A [`Message`] owns its attachments for
//! the lifetime of the query result; nothing here holds a back-reference
//! into the store.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use walkdir::WalkDir;

/// One synchronized message.
///
/// Immutable once created. `rowid` is the store-assigned strictly increasing
/// position; `guid` is the separately issued globally unique identifier.
#[derive(Clone, Debug)]
pub struct Message {
    /// Store-assigned position, strictly increasing.
    pub rowid: i64,
    /// Globally unique identifier.
    pub guid: String,
    /// Body text; absent for attachment-only messages.
    pub text: Option<String>,
    /// Sender identity (phone number or email).
    pub handle_id: String,
    /// Whether the message originated locally.
    pub is_from_me: bool,
    /// Creation time.
    pub date: Option<DateTime<Utc>>,
    /// Read time.
    pub date_read: Option<DateTime<Utc>>,
    /// Delivery time.
    pub date_delivered: Option<DateTime<Utc>>,
    /// Conversation the message belongs to.
    pub chat_id: Option<i64>,
    /// Whether the store flags this message as carrying attachments.
    pub has_attachments: bool,
    /// Attachments, populated only when `has_attachments` is set.
    pub attachments: Vec<Attachment>,
}

/// One message attachment.
#[derive(Clone, Debug)]
pub struct Attachment {
    /// Store-assigned position.
    pub rowid: i64,
    /// Globally unique identifier.
    pub guid: String,
    /// Path as recorded by the store; may no longer exist.
    pub filename: Option<String>,
    /// Declared MIME type.
    pub mime_type: Option<String>,
    /// Human-readable display name.
    pub transfer_name: Option<String>,
    /// Declared size in bytes.
    pub total_bytes: i64,
    /// Creation time.
    pub created_at: Option<DateTime<Utc>>,
}

impl Attachment {
    /// Resolve the attachment's on-disk location, best effort.
    ///
    /// The recorded path is tried first (`~/` expanded, absolute paths taken
    /// as-is, relative paths rooted next to `attachments_dir`). When the
    /// recorded path points into volatile temp storage and no longer exists,
    /// `attachments_dir` is searched for the transfer name. The recorded
    /// path is returned even when missing so callers can report it; `None`
    /// only when no path was recorded at all. Never mutates the attachment.
    pub fn local_path(&self, attachments_dir: &Path) -> Option<PathBuf> {
        let filename = self.filename.as_deref()?;
        let stored = expand_stored_path(filename, attachments_dir);
        if stored.exists() {
            return Some(stored);
        }

        let volatile = filename.contains("/var/folders/") || filename.contains("/tmp/");
        if volatile {
            if let Some(name) = self.transfer_name.as_deref() {
                if let Some(found) = find_by_name(attachments_dir, name) {
                    return Some(found);
                }
            }
        }

        Some(stored)
    }

    /// Display name for logs: transfer name, recorded filename, or "unknown".
    pub fn display_name(&self) -> &str {
        self.transfer_name
            .as_deref()
            .or(self.filename.as_deref())
            .unwrap_or("unknown")
    }
}

fn expand_stored_path(filename: &str, attachments_dir: &Path) -> PathBuf {
    if let Some(rest) = filename.strip_prefix("~/") {
        return home_dir().join(rest);
    }
    if filename.starts_with('/') {
        return PathBuf::from(filename);
    }
    // Relative paths are rooted beside the permanent attachments directory.
    attachments_dir
        .parent()
        .unwrap_or(attachments_dir)
        .join(filename)
}

fn home_dir() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string()))
}

/// Search `dir` for a file named `name`, first match wins.
fn find_by_name(dir: &Path, name: &str) -> Option<PathBuf> {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .find(|entry| entry.file_type().is_file() && entry.file_name() == name)
        .map(walkdir::DirEntry::into_path)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn attachment(filename: Option<&str>, transfer_name: Option<&str>) -> Attachment {
        Attachment {
            rowid: 1,
            guid: "att-1".into(),
            filename: filename.map(String::from),
            mime_type: Some("image/png".into()),
            transfer_name: transfer_name.map(String::from),
            total_bytes: 1024,
            created_at: None,
        }
    }

    #[test]
    fn no_recorded_path_resolves_to_none() {
        let dir = tempfile::tempdir().unwrap();
        let att = attachment(None, Some("photo.png"));
        assert_eq!(att.local_path(dir.path()), None);
    }

    #[test]
    fn existing_absolute_path_used_directly() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("photo.png");
        std::fs::write(&file, b"png").unwrap();

        let att = attachment(Some(file.to_str().unwrap()), None);
        assert_eq!(att.local_path(dir.path()), Some(file));
    }

    #[test]
    fn missing_volatile_path_found_by_transfer_name() {
        let dir = tempfile::tempdir().unwrap();
        let attachments = dir.path().join("Attachments");
        let nested = attachments.join("ab").join("cd");
        std::fs::create_dir_all(&nested).unwrap();
        let relocated = nested.join("photo.png");
        std::fs::write(&relocated, b"png").unwrap();

        let att = attachment(
            Some("/var/folders/xy/T/photo.png"),
            Some("photo.png"),
        );
        assert_eq!(att.local_path(&attachments), Some(relocated));
    }

    #[test]
    fn missing_nonvolatile_path_returned_for_reporting() {
        let dir = tempfile::tempdir().unwrap();
        let att = attachment(Some("/nowhere/else/photo.png"), Some("photo.png"));
        assert_eq!(
            att.local_path(dir.path()),
            Some(PathBuf::from("/nowhere/else/photo.png"))
        );
    }

    #[test]
    fn missing_volatile_path_without_match_returned_as_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let att = attachment(Some("/tmp/gone/photo.png"), Some("photo.png"));
        assert_eq!(
            att.local_path(dir.path()),
            Some(PathBuf::from("/tmp/gone/photo.png"))
        );
    }

    #[test]
    fn display_name_prefers_transfer_name() {
        assert_eq!(
            attachment(Some("/a/b.png"), Some("nice.png")).display_name(),
            "nice.png"
        );
        assert_eq!(attachment(Some("/a/b.png"), None).display_name(), "/a/b.png");
        assert_eq!(attachment(None, None).display_name(), "unknown");
    }
}
