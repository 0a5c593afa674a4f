//! The local automation surface: sending messages through the system
//! messaging app.

use async_trait::async_trait;
use tracing::{error, info};

use msgsync_client::MessageSender;

/// Sends messages by driving the Messages app over `osascript`.
pub struct OsaScriptSender;

#[async_trait]
impl MessageSender for OsaScriptSender {
    async fn send_message(&self, handle_id: &str, text: &str) -> bool {
        let script = build_script(handle_id, text);
        match tokio::process::Command::new("osascript")
            .arg("-e")
            .arg(&script)
            .output()
            .await
        {
            Ok(output) if output.status.success() => {
                info!(handle_id = %handle_id, "message sent");
                true
            }
            Ok(output) => {
                error!(
                    handle_id = %handle_id,
                    stderr = %String::from_utf8_lossy(&output.stderr),
                    "osascript refused to send message"
                );
                false
            }
            Err(err) => {
                error!(error = %err, "failed to run osascript");
                false
            }
        }
    }
}

/// Build the send script, escaping backslashes and quotes in user input.
fn build_script(handle_id: &str, text: &str) -> String {
    let escaped_text = escape(text);
    let escaped_handle = escape(handle_id);
    format!(
        r#"tell application "Messages"
    set targetBuddy to "{escaped_handle}"
    set targetService to id of 1st account whose service type = iMessage
    set theBuddy to participant targetBuddy of account id targetService
    send "{escaped_text}" to theBuddy
end tell"#
    )
}

fn escape(input: &str) -> String {
    input.replace('\\', "\\\\").replace('"', "\\\"")
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_quotes_and_backslashes() {
        assert_eq!(escape(r#"say "hi""#), r#"say \"hi\""#);
        assert_eq!(escape(r"a\b"), r"a\\b");
        assert_eq!(escape(r#"\""#), r#"\\\""#);
    }

    #[test]
    fn script_embeds_escaped_values() {
        let script = build_script("+1555", r#"she said "ok""#);
        assert!(script.contains(r#"set targetBuddy to "+1555""#));
        assert!(script.contains(r#"send "she said \"ok\"" to theBuddy"#));
    }
}
