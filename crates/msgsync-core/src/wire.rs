//! JSON wire protocol for the sync channel.
//!
//! Envelopes are internally tagged on a `type` field. Wire DTOs carry
//! timestamps as RFC 3339 strings (or null) and, for attachments, the
//! derived local path — both computed at serialization time, never stored
//! on the model types.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Attachment, Message};

/// One message as it appears on the wire.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireMessage {
    /// Store position.
    pub rowid: i64,
    /// Globally unique identifier.
    pub guid: String,
    /// Body text.
    pub text: Option<String>,
    /// Sender identity.
    pub handle_id: String,
    /// Whether the message originated locally.
    pub is_from_me: bool,
    /// Creation time, RFC 3339.
    pub date: Option<String>,
    /// Read time, RFC 3339.
    pub date_read: Option<String>,
    /// Delivery time, RFC 3339.
    pub date_delivered: Option<String>,
    /// Conversation identifier.
    pub chat_id: Option<i64>,
    /// Whether attachments are present.
    pub has_attachments: bool,
    /// Attachment metadata.
    pub attachments: Vec<WireAttachment>,
}

/// One attachment as it appears on the wire.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireAttachment {
    /// Store position.
    pub rowid: i64,
    /// Globally unique identifier.
    pub guid: String,
    /// Path as recorded by the store.
    pub filename: Option<String>,
    /// Declared MIME type.
    pub mime_type: Option<String>,
    /// Human-readable display name.
    pub transfer_name: Option<String>,
    /// Declared size in bytes.
    pub total_bytes: i64,
    /// Creation time, RFC 3339.
    pub created_at: Option<String>,
    /// Derived local path, if one was recorded.
    pub local_path: Option<String>,
}

impl WireMessage {
    /// Build the wire shape of `msg`, resolving attachment paths against
    /// `attachments_dir`.
    pub fn from_message(msg: &Message, attachments_dir: &Path) -> Self {
        Self {
            rowid: msg.rowid,
            guid: msg.guid.clone(),
            text: msg.text.clone(),
            handle_id: msg.handle_id.clone(),
            is_from_me: msg.is_from_me,
            date: rfc3339(msg.date),
            date_read: rfc3339(msg.date_read),
            date_delivered: rfc3339(msg.date_delivered),
            chat_id: msg.chat_id,
            has_attachments: msg.has_attachments,
            attachments: msg
                .attachments
                .iter()
                .map(|att| WireAttachment::from_attachment(att, attachments_dir))
                .collect(),
        }
    }
}

impl WireAttachment {
    /// Build the wire shape of `att`, resolving its path against
    /// `attachments_dir`.
    pub fn from_attachment(att: &Attachment, attachments_dir: &Path) -> Self {
        Self {
            rowid: att.rowid,
            guid: att.guid.clone(),
            filename: att.filename.clone(),
            mime_type: att.mime_type.clone(),
            transfer_name: att.transfer_name.clone(),
            total_bytes: att.total_bytes,
            created_at: rfc3339(att.created_at),
            local_path: att
                .local_path(attachments_dir)
                .map(|p| p.to_string_lossy().into_owned()),
        }
    }
}

fn rfc3339(ts: Option<DateTime<Utc>>) -> Option<String> {
    ts.map(|t| t.to_rfc3339())
}

/// Messages sent to the remote endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    /// A batch of freshly captured records.
    NewMessages {
        /// The batch, ascending by position.
        messages: Vec<WireMessage>,
        /// Send time, RFC 3339.
        timestamp: String,
    },
    /// Attachment metadata, optionally with inlined content.
    Attachment {
        /// Attachment metadata.
        attachment: WireAttachment,
        /// Base64 file content when the transfer succeeded.
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<String>,
        /// Machine-readable tag when the transfer failed.
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// One page of history, answering `request_history`.
    HistoryResponse {
        /// The page, in the requested order.
        messages: Vec<WireMessage>,
        /// Whether more records may exist past this page.
        has_more: bool,
        /// Echo of the requested lower bound, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        since_rowid: Option<i64>,
        /// Echo of the requested upper bound, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        before_rowid: Option<i64>,
    },
    /// Keepalive reply.
    Pong,
}

/// Messages received from the remote endpoint.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inbound {
    /// Send a message through the local automation surface.
    SendMessage {
        /// Recipient identity.
        handle_id: String,
        /// Message body.
        text: String,
    },
    /// Keepalive probe; answered with [`Outbound::Pong`].
    Ping,
    /// Ask for a page of history.
    RequestHistory {
        /// Return records with position strictly above this, ascending.
        #[serde(default)]
        since_rowid: Option<i64>,
        /// Return records with position strictly below this, descending.
        #[serde(default)]
        before_rowid: Option<i64>,
        /// Page size cap.
        #[serde(default)]
        limit: Option<usize>,
    },
    /// Anything unrecognized; ignored, non-fatal.
    #[serde(other)]
    Unknown,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timestamp::from_store_ticks;

    fn sample_message() -> Message {
        Message {
            rowid: 42,
            guid: "msg-42".into(),
            text: Some("hello".into()),
            handle_id: "+15550001111".into(),
            is_from_me: false,
            date: from_store_ticks(Some(694_224_000_000_000_000)),
            date_read: None,
            date_delivered: None,
            chat_id: Some(7),
            has_attachments: false,
            attachments: vec![],
        }
    }

    #[test]
    fn new_messages_envelope_shape() {
        let wire = WireMessage::from_message(&sample_message(), Path::new("/tmp"));
        let out = Outbound::NewMessages {
            messages: vec![wire],
            timestamp: "2023-01-01T00:00:00+00:00".into(),
        };
        let value = serde_json::to_value(&out).unwrap();
        assert_eq!(value["type"], "new_messages");
        assert_eq!(value["messages"][0]["rowid"], 42);
        assert_eq!(value["messages"][0]["date"], "2023-01-01T00:00:00+00:00");
        assert_eq!(value["messages"][0]["date_read"], serde_json::Value::Null);
    }

    #[test]
    fn pong_envelope_is_type_only() {
        let value = serde_json::to_value(&Outbound::Pong).unwrap();
        assert_eq!(value, serde_json::json!({"type": "pong"}));
    }

    #[test]
    fn attachment_envelope_omits_absent_fields() {
        let att = Attachment {
            rowid: 1,
            guid: "att-1".into(),
            filename: None,
            mime_type: None,
            transfer_name: Some("photo.png".into()),
            total_bytes: 10,
            created_at: None,
        };
        let out = Outbound::Attachment {
            attachment: WireAttachment::from_attachment(&att, Path::new("/tmp")),
            data: None,
            error: None,
        };
        let value = serde_json::to_value(&out).unwrap();
        assert_eq!(value["type"], "attachment");
        assert!(value.get("data").is_none());
        assert!(value.get("error").is_none());
    }

    #[test]
    fn history_response_echoes_bound() {
        let out = Outbound::HistoryResponse {
            messages: vec![],
            has_more: false,
            since_rowid: None,
            before_rowid: Some(10),
        };
        let value = serde_json::to_value(&out).unwrap();
        assert_eq!(value["has_more"], false);
        assert_eq!(value["before_rowid"], 10);
        assert!(value.get("since_rowid").is_none());
    }

    #[test]
    fn inbound_send_message_parses() {
        let inbound: Inbound = serde_json::from_str(
            r#"{"type":"send_message","handle_id":"+15550001111","text":"hi"}"#,
        )
        .unwrap();
        match inbound {
            Inbound::SendMessage { handle_id, text } => {
                assert_eq!(handle_id, "+15550001111");
                assert_eq!(text, "hi");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn inbound_request_history_defaults() {
        let inbound: Inbound =
            serde_json::from_str(r#"{"type":"request_history"}"#).unwrap();
        match inbound {
            Inbound::RequestHistory {
                since_rowid,
                before_rowid,
                limit,
            } => {
                assert_eq!(since_rowid, None);
                assert_eq!(before_rowid, None);
                assert_eq!(limit, None);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn inbound_unknown_type_tolerated() {
        let inbound: Inbound =
            serde_json::from_str(r#"{"type":"surprise","extra":1}"#).unwrap();
        assert!(matches!(inbound, Inbound::Unknown));
    }

    #[test]
    fn attachment_wire_carries_resolved_path() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("doc.pdf");
        std::fs::write(&file, b"pdf").unwrap();
        let att = Attachment {
            rowid: 3,
            guid: "att-3".into(),
            filename: Some(file.to_string_lossy().into_owned()),
            mime_type: Some("application/pdf".into()),
            transfer_name: Some("doc.pdf".into()),
            total_bytes: 3,
            created_at: None,
        };
        let wire = WireAttachment::from_attachment(&att, dir.path());
        assert_eq!(wire.local_path.as_deref(), file.to_str());
    }
}
