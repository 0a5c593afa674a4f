//! Read-only query layer over the message store.
//!
//! All pagination is by absolute position (rowid), never by time: positions
//! are strictly increasing and survive clock changes. A reader without a
//! live connection answers every query with an empty page — the store being
//! temporarily unreadable (permission not yet granted) is an expected,
//! recoverable condition, not an error.

use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags, params};
use tracing::debug;

use msgsync_core::richtext::extract_text;
use msgsync_core::timestamp::from_store_ticks;
use msgsync_core::{Attachment, Message};

use crate::errors::{Result, StoreError};

/// One bounded page of history, by addressing mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HistoryQuery {
    /// Records with position strictly above `rowid`, ascending.
    Since {
        /// Exclusive lower bound.
        rowid: i64,
        /// Page size cap.
        limit: usize,
    },
    /// Records with position strictly below `rowid`, descending.
    Before {
        /// Exclusive upper bound.
        rowid: i64,
        /// Page size cap.
        limit: usize,
    },
    /// The newest records, descending.
    Latest {
        /// Page size cap.
        limit: usize,
    },
}

impl HistoryQuery {
    /// The page size cap of this query.
    pub fn limit(&self) -> usize {
        match *self {
            Self::Since { limit, .. } | Self::Before { limit, .. } | Self::Latest { limit } => {
                limit
            }
        }
    }
}

const BASE_SELECT: &str = "SELECT m.ROWID, m.guid, m.text, m.attributedBody, \
     h.id, m.is_from_me, m.date, m.date_read, m.date_delivered, \
     cmj.chat_id, m.cache_has_attachments \
     FROM message m \
     LEFT JOIN handle h ON m.handle_id = h.ROWID \
     LEFT JOIN chat_message_join cmj ON m.ROWID = cmj.message_id";

/// Raw columns of one record row, before attachments are joined in.
struct RawRow {
    rowid: i64,
    guid: String,
    text: Option<String>,
    attributed_body: Option<Vec<u8>>,
    handle_id: Option<String>,
    is_from_me: bool,
    date: Option<i64>,
    date_read: Option<i64>,
    date_delivered: Option<i64>,
    chat_id: Option<i64>,
    has_attachments: bool,
}

/// Read-only interface to the message store.
pub struct MessageStore {
    db_path: PathBuf,
    conn: Option<Connection>,
}

impl MessageStore {
    /// Create a store handle for `db_path` without connecting.
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            conn: None,
        }
    }

    /// Open the read-only connection.
    pub fn connect(&mut self) -> Result<()> {
        let conn = Connection::open_with_flags(
            &self.db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI,
        )
        .map_err(|source| StoreError::Unavailable {
            path: self.db_path.clone(),
            source,
        })?;
        debug!(path = %self.db_path.display(), "connected to message store");
        self.conn = Some(conn);
        Ok(())
    }

    /// Whether a live connection is held.
    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Drop the connection, if any.
    pub fn close(&mut self) {
        self.conn = None;
    }

    /// Path this store reads from.
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Records with position strictly above `rowid`, ascending, at most
    /// `limit`.
    pub fn messages_since(&self, rowid: i64, limit: usize) -> Result<Vec<Message>> {
        self.fetch(HistoryQuery::Since { rowid, limit })
    }

    /// Records with position strictly below `rowid`, descending (newest
    /// first), at most `limit`.
    pub fn messages_before(&self, rowid: i64, limit: usize) -> Result<Vec<Message>> {
        self.fetch(HistoryQuery::Before { rowid, limit })
    }

    /// The newest records, descending, at most `limit`.
    pub fn latest_messages(&self, limit: usize) -> Result<Vec<Message>> {
        self.fetch(HistoryQuery::Latest { limit })
    }

    /// Run one history query. Empty page when disconnected.
    pub fn fetch(&self, query: HistoryQuery) -> Result<Vec<Message>> {
        let Some(conn) = &self.conn else {
            return Ok(Vec::new());
        };

        let limit = i64::try_from(query.limit()).unwrap_or(i64::MAX);
        let rows = match query {
            HistoryQuery::Since { rowid, .. } => {
                let sql = format!("{BASE_SELECT} WHERE m.ROWID > ?1 ORDER BY m.ROWID ASC LIMIT ?2");
                Self::query_rows(conn, &sql, params![rowid, limit])?
            }
            HistoryQuery::Before { rowid, .. } => {
                let sql =
                    format!("{BASE_SELECT} WHERE m.ROWID < ?1 ORDER BY m.ROWID DESC LIMIT ?2");
                Self::query_rows(conn, &sql, params![rowid, limit])?
            }
            HistoryQuery::Latest { .. } => {
                let sql = format!("{BASE_SELECT} ORDER BY m.ROWID DESC LIMIT ?1");
                Self::query_rows(conn, &sql, params![limit])?
            }
        };

        let mut messages = Vec::with_capacity(rows.len());
        for row in rows {
            let attachments = if row.has_attachments {
                self.attachments_for(conn, row.rowid)?
            } else {
                Vec::new()
            };
            messages.push(Self::into_message(row, attachments));
        }
        Ok(messages)
    }

    /// Position of the most recent record; 0 when the store is empty or
    /// disconnected.
    pub fn latest_rowid(&self) -> Result<i64> {
        let Some(conn) = &self.conn else {
            return Ok(0);
        };
        let max: Option<i64> = conn.query_row("SELECT MAX(ROWID) FROM message", [], |row| {
            row.get(0)
        })?;
        Ok(max.unwrap_or(0))
    }

    fn query_rows(
        conn: &Connection,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<RawRow>> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, |row| {
            Ok(RawRow {
                rowid: row.get(0)?,
                guid: row.get(1)?,
                text: row.get(2)?,
                attributed_body: row.get(3)?,
                handle_id: row.get(4)?,
                is_from_me: row.get::<_, i64>(5)? != 0,
                date: row.get(6)?,
                date_read: row.get(7)?,
                date_delivered: row.get(8)?,
                chat_id: row.get(9)?,
                has_attachments: row.get::<_, Option<i64>>(10)?.unwrap_or(0) != 0,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::from)
    }

    fn attachments_for(&self, conn: &Connection, message_rowid: i64) -> Result<Vec<Attachment>> {
        let mut stmt = conn.prepare(
            "SELECT a.ROWID, a.guid, a.filename, a.mime_type, a.transfer_name, \
             a.total_bytes, a.created_date \
             FROM attachment a \
             JOIN message_attachment_join maj ON a.ROWID = maj.attachment_id \
             WHERE maj.message_id = ?1",
        )?;
        let rows = stmt.query_map(params![message_rowid], |row| {
            Ok(Attachment {
                rowid: row.get(0)?,
                guid: row.get(1)?,
                filename: row.get(2)?,
                mime_type: row.get(3)?,
                transfer_name: row.get(4)?,
                total_bytes: row.get::<_, Option<i64>>(5)?.unwrap_or(0),
                created_at: from_store_ticks(row.get(6)?),
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::from)
    }

    fn into_message(row: RawRow, attachments: Vec<Attachment>) -> Message {
        // Prefer the plain-text column; recover from the rich-text blob when
        // it is empty or absent.
        let text = row
            .text
            .filter(|t| !t.is_empty())
            .or_else(|| row.attributed_body.as_deref().and_then(extract_text));
        Message {
            rowid: row.rowid,
            guid: row.guid,
            text,
            handle_id: row.handle_id.unwrap_or_else(|| "unknown".to_string()),
            is_from_me: row.is_from_me,
            date: from_store_ticks(row.date),
            date_read: from_store_ticks(row.date_read),
            date_delivered: from_store_ticks(row.date_delivered),
            chat_id: row.chat_id,
            has_attachments: row.has_attachments,
            attachments,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────


#[cfg(test)]
mod tests {
    use super::testutil::{create_fixture_db, insert_attachment, insert_message};
    use super::*;

    fn fixture(count: i64) -> (tempfile::TempDir, MessageStore) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("chat.db");
        create_fixture_db(&db_path);
        for i in 1..=count {
            insert_message(&db_path, i, &format!("message {i}"));
        }
        let mut store = MessageStore::new(&db_path);
        store.connect().unwrap();
        (dir, store)
    }

    #[test]
    fn connect_missing_file_is_unavailable() {
        let mut store = MessageStore::new("/nonexistent/chat.db");
        let err = store.connect().unwrap_err();
        assert!(matches!(err, StoreError::Unavailable { .. }));
        assert!(!store.is_connected());
    }

    #[test]
    fn disconnected_store_returns_empty_pages() {
        let store = MessageStore::new("/nonexistent/chat.db");
        assert!(store.messages_since(0, 10).unwrap().is_empty());
        assert!(store.messages_before(10, 10).unwrap().is_empty());
        assert!(store.latest_messages(10).unwrap().is_empty());
        assert_eq!(store.latest_rowid().unwrap(), 0);
    }

    #[test]
    fn since_is_ascending_exclusive_and_capped() {
        let (_dir, store) = fixture(10);
        let msgs = store.messages_since(4, 3).unwrap();
        let rowids: Vec<i64> = msgs.iter().map(|m| m.rowid).collect();
        assert_eq!(rowids, vec![5, 6, 7]);
        assert!(msgs.iter().all(|m| m.rowid > 4));
    }

    #[test]
    fn before_is_descending_exclusive_and_capped() {
        let (_dir, store) = fixture(10);
        let msgs = store.messages_before(8, 3).unwrap();
        let rowids: Vec<i64> = msgs.iter().map(|m| m.rowid).collect();
        assert_eq!(rowids, vec![7, 6, 5]);
        assert!(msgs.iter().all(|m| m.rowid < 8));
    }

    #[test]
    fn latest_is_descending() {
        let (_dir, store) = fixture(5);
        let msgs = store.latest_messages(2).unwrap();
        let rowids: Vec<i64> = msgs.iter().map(|m| m.rowid).collect();
        assert_eq!(rowids, vec![5, 4]);
    }

    #[test]
    fn latest_rowid_tracks_newest() {
        let (_dir, store) = fixture(17);
        assert_eq!(store.latest_rowid().unwrap(), 17);
    }

    #[test]
    fn latest_rowid_zero_on_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("chat.db");
        create_fixture_db(&db_path);
        let mut store = MessageStore::new(&db_path);
        store.connect().unwrap();
        assert_eq!(store.latest_rowid().unwrap(), 0);
    }

    #[test]
    fn row_fields_mapped() {
        let (_dir, store) = fixture(1);
        let msg = &store.latest_messages(1).unwrap()[0];
        assert_eq!(msg.guid, "guid-1");
        assert_eq!(msg.text.as_deref(), Some("message 1"));
        assert_eq!(msg.handle_id, "+15550001111");
        assert!(!msg.is_from_me);
        assert_eq!(msg.chat_id, Some(7));
        assert!(msg.date.is_some());
        assert_eq!(msg.date_read, None);
    }

    #[test]
    fn text_recovered_from_rich_text_blob() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("chat.db");
        create_fixture_db(&db_path);

        let mut blob = vec![0x04, 0x0B, 0x01, 0x2B, 0x0C];
        blob.extend_from_slice(b"blob message");
        blob.push(0x86);
        let conn = rusqlite::Connection::open(&db_path).unwrap();
        let _ = conn
            .execute(
                "INSERT INTO message (ROWID, guid, text, attributedBody, handle_id) \
                 VALUES (1, 'g-1', NULL, ?1, 1)",
                params![blob],
            )
            .unwrap();

        let mut store = MessageStore::new(&db_path);
        store.connect().unwrap();
        let msg = &store.latest_messages(1).unwrap()[0];
        assert_eq!(msg.text.as_deref(), Some("blob message"));
    }

    #[test]
    fn attachments_joined_only_when_flagged() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("chat.db");
        create_fixture_db(&db_path);
        insert_message(&db_path, 1, "no attachments");
        insert_message(&db_path, 2, "with attachment");
        insert_attachment(&db_path, 2, 1, "/tmp/photo.png", 2048);

        let mut store = MessageStore::new(&db_path);
        store.connect().unwrap();
        let msgs = store.messages_since(0, 10).unwrap();
        assert!(msgs[0].attachments.is_empty());
        assert!(!msgs[0].has_attachments);
        assert!(msgs[1].has_attachments);
        assert_eq!(msgs[1].attachments.len(), 1);
        let att = &msgs[1].attachments[0];
        assert_eq!(att.guid, "att-guid-1");
        assert_eq!(att.transfer_name.as_deref(), Some("photo.png"));
        assert_eq!(att.total_bytes, 2048);
    }

    #[test]
    fn missing_handle_maps_to_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("chat.db");
        create_fixture_db(&db_path);
        let conn = rusqlite::Connection::open(&db_path).unwrap();
        let _ = conn
            .execute(
                "INSERT INTO message (ROWID, guid, text, handle_id) \
                 VALUES (1, 'g-1', 'orphan', 999)",
                [],
            )
            .unwrap();

        let mut store = MessageStore::new(&db_path);
        store.connect().unwrap();
        let msg = &store.latest_messages(1).unwrap()[0];
        assert_eq!(msg.handle_id, "unknown");
    }
}
