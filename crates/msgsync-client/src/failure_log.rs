//! Append-only audit log for attachments that could not be transferred.
//!
//! One tab-separated line per failure: timestamp, error tag, guid, display
//! name, resolved path, declared size. This file is the recovery trail for
//! re-requesting attachments out of band; writing to it must never take the
//! transfer down, so write errors are logged and swallowed.

use std::io::Write;
use std::path::PathBuf;

use chrono::Utc;
use tracing::error;

use msgsync_core::WireAttachment;

/// Handle to the failure audit log file.
#[derive(Clone, Debug)]
pub struct FailureLog {
    path: PathBuf,
}

impl FailureLog {
    /// Create a handle; the file and its directory are created on first
    /// append.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Append one failure line.
    pub fn append(&self, error_tag: &str, attachment: &WireAttachment) {
        if let Err(err) = self.try_append(error_tag, attachment) {
            error!(error = %err, path = %self.path.display(), "failed to write attachment audit log");
        }
    }

    fn try_append(&self, error_tag: &str, attachment: &WireAttachment) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let name = attachment
            .transfer_name
            .as_deref()
            .or(attachment.filename.as_deref())
            .unwrap_or("unknown");
        let path = attachment.local_path.as_deref().unwrap_or("no_path");
        writeln!(
            file,
            "{}\t{}\t{}\t{}\t{}\t{} bytes",
            Utc::now().to_rfc3339(),
            error_tag,
            attachment.guid,
            name,
            path,
            attachment.total_bytes,
        )
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn attachment() -> WireAttachment {
        WireAttachment {
            rowid: 9,
            guid: "att-guid-9".into(),
            filename: Some("/var/folders/xx/photo.png".into()),
            mime_type: Some("image/png".into()),
            transfer_name: Some("photo.png".into()),
            total_bytes: 2048,
            created_at: None,
            local_path: Some("/resolved/photo.png".into()),
        }
    }

    #[test]
    fn append_creates_file_and_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("failed_attachments.log");
        let log = FailureLog::new(&path);
        log.append("file_not_found", &attachment());
        assert!(path.exists());
    }

    #[test]
    fn line_is_tab_separated_with_all_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("failed.log");
        let log = FailureLog::new(&path);
        log.append("file_too_large", &attachment());

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 1);
        let fields: Vec<&str> = lines[0].split('\t').collect();
        assert_eq!(fields.len(), 6);
        assert_eq!(fields[1], "file_too_large");
        assert_eq!(fields[2], "att-guid-9");
        assert_eq!(fields[3], "photo.png");
        assert_eq!(fields[4], "/resolved/photo.png");
        assert_eq!(fields[5], "2048 bytes");
    }

    #[test]
    fn appends_accumulate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("failed.log");
        let log = FailureLog::new(&path);
        log.append("no_local_path", &attachment());
        log.append("read_error: denied", &attachment());

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn missing_names_fall_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("failed.log");
        let log = FailureLog::new(&path);
        let mut att = attachment();
        att.transfer_name = None;
        att.filename = None;
        att.local_path = None;
        log.append("no_local_path", &att);

        let content = std::fs::read_to_string(&path).unwrap();
        let fields: Vec<&str> = content.lines().next().unwrap().split('\t').collect();
        assert_eq!(fields[3], "unknown");
        assert_eq!(fields[4], "no_path");
    }
}
