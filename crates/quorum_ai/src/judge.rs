//! Helpers shared by every component that asks a backend for a structured
//! verdict (classification, evaluation).

use serde_json::Value;

/// Pull the outermost JSON object out of a model reply. Judges routinely wrap
/// the object in prose or code fences, so everything outside the first `{`
/// and the last `}` is ignored.
pub(crate) fn extract_json_object(reply: &str) -> Option<Value> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&reply[start..=end]) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}

/// Shorten `text` to at most `max` characters for logs and error details.
pub(crate) fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_owned(),
    }
}
