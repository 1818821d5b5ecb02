//! Getting a finished response onto the chat within the transport's limits.

use parley_core::error::Result;
use parley_core::types::{ChatId, MessageId};
use tracing::warn;

use crate::transport::{Button, Format, Transport};

/// Split `text` into fragments of at most `limit` UTF-16 code units, the unit
/// Telegram measures message length in.
///
/// Each cut lands just after the last newline inside the window when that
/// newline sits past the window's midpoint; otherwise the window is cut hard.
/// A fragment always holds at least one character. Concatenating the
/// fragments gives back `text` exactly.
pub fn split_text(text: &str, limit: usize) -> Vec<&str> {
    let limit = limit.max(1);
    let mut fragments = Vec::new();
    let mut rest = text;

    while let Some(cut) = next_cut(rest, limit) {
        fragments.push(&rest[..cut]);
        rest = &rest[cut..];
    }

    if !rest.is_empty() || fragments.is_empty() {
        fragments.push(rest);
    }
    fragments
}

/// Byte offset to cut `rest` at, or `None` when it already fits.
fn next_cut(rest: &str, limit: usize) -> Option<usize> {
    let mut units = 0;
    // Byte offset just past the newline, and the units before it.
    let mut newline: Option<(usize, usize)> = None;

    for (i, c) in rest.char_indices() {
        let width = c.len_utf16();
        if units + width > limit {
            let cut = match newline {
                Some((after, before)) if before >= limit / 2 => after,
                _ => i,
            };
            return Some(if cut == 0 { c.len_utf8() } else { cut });
        }
        if c == '\n' {
            newline = Some((i + 1, units));
        }
        units += width;
    }
    None
}

/// Duration and cost line appended to a response. Omitted for free runs.
pub fn footer(duration_ms: u64, cost_usd: f64) -> Option<String> {
    if cost_usd <= 0.0 {
        return None;
    }
    let secs = duration_ms as f64 / 1000.0;
    Some(format!("\n\n⏱ {secs:.1}s · 💰 ${cost_usd:.4}"))
}

/// Send once with rich formatting; if the transport rejects the message
/// itself, send the same text once more as plain text.
pub async fn send_with_fallback(
    transport: &dyn Transport,
    chat_id: ChatId,
    text: &str,
    buttons: &[Button],
) -> Result<MessageId> {
    match transport.send(chat_id, text, Format::Rich, buttons).await {
        Ok(id) => Ok(id),
        Err(e) if e.is_rejected_request() => {
            warn!(chat_id, error = %e, "rich send rejected, falling back to plain text");
            transport.send(chat_id, text, Format::Plain, buttons).await
        }
        Err(e) => Err(e),
    }
}

/// Deliver `text` plus optional footer, split as needed. Buttons ride on the
/// final fragment only. Stops at the first fragment that cannot be sent.
pub async fn deliver(
    transport: &dyn Transport,
    chat_id: ChatId,
    text: &str,
    footer: Option<&str>,
    buttons: &[Button],
    limit: usize,
) -> Result<()> {
    let full = match footer {
        Some(footer) => format!("{text}{footer}"),
        None => text.to_string(),
    };

    let fragments = split_text(&full, limit);
    let last = fragments.len() - 1;
    for (i, fragment) in fragments.into_iter().enumerate() {
        let fragment_buttons = if i == last { buttons } else { &[] };
        send_with_fallback(transport, chat_id, fragment, fragment_buttons).await?;
    }
    Ok(())
}
