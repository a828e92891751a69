use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::{ChatMessage, DeltaRecord, MessageInput};

// Upstream tokenization sometimes emits "` foo" for inline code openings.
static BACKTICK_GAP: Lazy<Regex> = Lazy::new(|| Regex::new(r"^`\s+").expect("static regex"));

/// Drop the whitespace after a leading single backtick. Nothing else is trimmed.
pub fn normalize_delta_content(s: &str) -> String {
    BACKTICK_GAP.replace(s, "`").into_owned()
}

pub fn normalize_delta(mut d: DeltaRecord) -> DeltaRecord {
    if let Some(c) = d.content.as_deref() {
        d.content = Some(normalize_delta_content(c));
    }
    d
}

/// Fill in defaults for a caller-supplied entry. Normalized entries are never loading:
/// only the session's own placeholder may be.
pub fn normalize_entry(input: MessageInput, now: i64) -> ChatMessage {
    let mut meta = input.meta.unwrap_or_default();
    meta.loading = false;
    ChatMessage {
        content: input.content,
        role: input.role,
        timestamp: input.timestamp.filter(|t| *t > 0).unwrap_or(now),
        meta,
    }
}

pub fn normalize_entries<I>(inputs: I, now: i64) -> Vec<ChatMessage>
where
    I: IntoIterator<Item = MessageInput>,
{
    inputs
        .into_iter()
        .map(|m| normalize_entry(m, now))
        .collect()
}

/// Human readable elapsed time for `meta.responseTime`.
pub fn format_response_time(elapsed_ms: i64) -> String {
    let secs = elapsed_ms.max(0) as f64 / 1000.0;
    if secs < 60.0 {
        format!("{secs:.2}s")
    } else {
        let mins = (secs / 60.0).floor();
        format!("{}m {:.2}s", mins as u64, secs - mins * 60.0)
    }
}
