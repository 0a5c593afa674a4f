//! Thin command-line front end: query the store and print results, or send
//! a one-off message.

use anyhow::{Context, Result, bail};

use msgsync_client::MessageSender;
use msgsync_core::WireMessage;
use msgsync_settings::Settings;
use msgsync_store::MessageStore;

use crate::automation::OsaScriptSender;

/// Print a page of records as pretty JSON.
pub fn fetch(
    settings: &Settings,
    since: Option<i64>,
    before: Option<i64>,
    limit: usize,
) -> Result<()> {
    let store = open_store(settings)?;
    let messages = match (before, since) {
        (Some(rowid), _) => store.messages_before(rowid, limit)?,
        (None, Some(rowid)) => store.messages_since(rowid, limit)?,
        (None, None) => store.latest_messages(limit)?,
    };
    let wire: Vec<WireMessage> = messages
        .iter()
        .map(|msg| WireMessage::from_message(msg, &settings.attachments_dir))
        .collect();
    println!("{}", serde_json::to_string_pretty(&wire)?);
    Ok(())
}

/// Print store location, highest position, and a peek at the newest record.
pub fn info(settings: &Settings) -> Result<()> {
    let store = open_store(settings)?;
    println!("Store path: {}", settings.db_path.display());
    println!("Latest record position: {}", store.latest_rowid()?);

    let recent = store.latest_messages(10)?;
    println!("Recent records retrieved: {}", recent.len());
    if let Some(msg) = recent.first() {
        println!();
        println!("Most recent record:");
        println!("  From: {}", msg.handle_id);
        println!(
            "  Date: {}",
            msg.date.map_or_else(|| "unknown".to_string(), |d| d.to_rfc3339())
        );
        let text = msg.text.as_deref().unwrap_or("(no text)");
        println!("  Text: {}", text.chars().take(100).collect::<String>());
    }
    Ok(())
}

/// Send one message through the automation surface.
pub async fn send(to: &str, message: &str) -> Result<()> {
    if OsaScriptSender.send_message(to, message).await {
        println!("Message sent to {to}");
        Ok(())
    } else {
        bail!("failed to send message to {to}")
    }
}

fn open_store(settings: &Settings) -> Result<MessageStore> {
    let mut store = MessageStore::new(&settings.db_path);
    store.connect().with_context(|| {
        format!(
            "Cannot open the message store at {}. Ensure Full Disk Access is granted.",
            settings.db_path.display()
        )
    })?;
    Ok(store)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
