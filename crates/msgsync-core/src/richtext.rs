//! Plain-text extraction from the store's serialized rich-text blobs.
//!
//! Records written by newer producer versions leave the plain-text column
//! empty and carry the body inside a binary rich-text container instead. The
//! container format is undocumented and varies across producer versions, so
//! extraction is two-tiered:
//!
//! 1. **Structured path**: locate the `0x01 0x2B` marker that precedes the
//!    string payload, read the length prefix (single byte `< 0x80` is the
//!    literal length; `0x81` introduces a two-byte little-endian length),
//!    and decode exactly that many bytes as UTF-8.
//! 2. **Fallback scan**: walk the blob collecting maximal runs of printable
//!    ASCII / well-formed UTF-8 sequences and keep the longest run that
//!    survives filtering.
//!
//! The result is "best observed text", not guaranteed exact recovery.

/// Marker sequence preceding the string payload.
const TEXT_MARKER: [u8; 2] = [0x01, 0x2B];

/// Length-prefix byte introducing the extended two-byte form.
const EXTENDED_LENGTH: u8 = 0x81;

/// Placeholder character embedded where an attachment sat in the body.
const OBJECT_REPLACEMENT: char = '\u{FFFC}';

// Fallback filtering rules. The container embeds internal type names and
// format sentinels between text fragments; these tokens are excluded from
// candidate runs. Tunable constants, not load-bearing grammar.
const RESERVED_TYPE_PREFIX: &str = "NS";
const FORMAT_SENTINEL: &str = "streamtyped";
const INTERNAL_KEY_MARKER: &str = "__kIM";

/// Extract the message body from a rich-text blob.
///
/// Returns `None` for empty input, attachment-only bodies (nothing left
/// after stripping placeholders), and blobs where no plausible text run
/// survives the fallback filters. Never panics on any input.
pub fn extract_text(blob: &[u8]) -> Option<String> {
    if blob.is_empty() {
        return None;
    }

    let Some(marker_idx) = find_marker(blob) else {
        return fallback_scan(blob);
    };
    let pos = marker_idx + TEXT_MARKER.len();
    let Some(&length_byte) = blob.get(pos) else {
        return fallback_scan(blob);
    };

    let (text_len, text_start) = if length_byte == EXTENDED_LENGTH {
        if pos + 2 >= blob.len() {
            return fallback_scan(blob);
        }
        let len = usize::from(blob[pos + 1]) | (usize::from(blob[pos + 2]) << 8);
        (len, pos + 3)
    } else if length_byte < 0x80 {
        (usize::from(length_byte), pos + 1)
    } else {
        return fallback_scan(blob);
    };

    // The declared length bounds the text, not any trailing marker byte;
    // clamp to the blob end for truncated inputs.
    let text_end = text_start.saturating_add(text_len).min(blob.len());
    let Ok(text) = std::str::from_utf8(&blob[text_start..text_end]) else {
        return fallback_scan(blob);
    };

    let stripped: String = text.chars().filter(|&c| c != OBJECT_REPLACEMENT).collect();
    let trimmed = stripped.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn find_marker(blob: &[u8]) -> Option<usize> {
    blob.windows(TEXT_MARKER.len())
        .position(|w| w == TEXT_MARKER)
}

/// Scan for the longest readable run when the structured path fails.
fn fallback_scan(blob: &[u8]) -> Option<String> {
    let mut best: Option<String> = None;
    let mut run_start: Option<usize> = None;

    for (i, &byte) in blob.iter().enumerate() {
        let printable_ascii = (0x20..=0x7E).contains(&byte);
        let utf8_lead = (0xC0..=0xF7).contains(&byte);
        let utf8_cont = (0x80..=0xBF).contains(&byte);

        if printable_ascii || utf8_lead {
            if run_start.is_none() {
                run_start = Some(i);
            }
        } else if utf8_cont && run_start.is_some() {
            // Continuation bytes extend the current run.
        } else if let Some(start) = run_start.take() {
            consider_run(&blob[start..i], &mut best);
        }
    }
    if let Some(start) = run_start {
        consider_run(&blob[start..], &mut best);
    }

    best.filter(|text| text.len() > 1)
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

/// Keep `bytes` as the best candidate if it decodes cleanly, beats the
/// current best on length, and passes the token filters.
fn consider_run(bytes: &[u8], best: &mut Option<String>) {
    let Ok(candidate) = std::str::from_utf8(bytes) else {
        return;
    };
    let longer = best.as_ref().is_none_or(|b| candidate.len() > b.len());
    if longer
        && candidate.chars().any(char::is_alphanumeric)
        && !candidate.starts_with(RESERVED_TYPE_PREFIX)
        && candidate != FORMAT_SENTINEL
        && !candidate.contains(INTERNAL_KEY_MARKER)
    {
        *best = Some(candidate.to_string());
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
