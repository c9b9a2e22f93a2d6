use serde_json::Value;

const MAX_RAW_MESSAGE: usize = 200;

/// Extract a human-readable message from a provider error body.
///
/// Handles the shapes the three upstream families actually emit:
/// `{"error": {"message": ...}}` (OpenAI, Anthropic, Gemini),
/// `{"error": "..."}`, a bare `{"message": ...}`, and Gemini's array-wrapped
/// batch variant. Anything else falls back to the (truncated) raw body.
pub fn parse_upstream_error(body: &[u8]) -> String {
    if body.is_empty() {
        return "unknown error".to_string();
    }

    if let Ok(value) = serde_json::from_slice::<Value>(body)
        && let Some(message) = extract_message(&value)
    {
        return message;
    }

    truncate_raw(body)
}

fn extract_message(value: &Value) -> Option<String> {
    match value {
        Value::Object(map) => {
            if let Some(error) = map.get("error") {
                match error {
                    Value::Object(inner) => {
                        if let Some(Value::String(msg)) = inner.get("message") {
                            return non_empty(msg);
                        }
                    }
                    Value::String(msg) => return non_empty(msg),
                    _ => {}
                }
            }
            if let Some(Value::String(msg)) = map.get("message") {
                return non_empty(msg);
            }
            None
        }
        // Gemini wraps batch errors in a single-element array.
        Value::Array(items) => items.first().and_then(extract_message),
        _ => None,
    }
}

fn non_empty(msg: &str) -> Option<String> {
    let msg = msg.trim();
    (!msg.is_empty()).then(|| msg.to_string())
}

fn truncate_raw(body: &[u8]) -> String {
    let raw = String::from_utf8_lossy(body);
    let raw = raw.trim();
    if raw.is_empty() {
        return "unknown error".to_string();
    }
    let mut end = raw.len().min(MAX_RAW_MESSAGE);
    while !raw.is_char_boundary(end) {
        end -= 1;
    }
    raw[..end].to_string()
}
