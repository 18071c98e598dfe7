//! Model output cleanup
//!
//! Small models wrap answers in markdown fences, prefix them with prose or
//! append commentary. These helpers recover the payload or report that
//! there is none.

use serde_json::Value;

/// Remove a surrounding markdown code fence (```lang ... ```), if any.
///
/// Text outside the first fenced block is discarded. Unfenced text is
/// returned trimmed.
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    let Some(open) = trimmed.find("```") else {
        return trimmed.to_string();
    };
    let after_open = &trimmed[open + 3..];
    // drop the language tag on the opening line
    let body = match after_open.find('\n') {
        Some(nl) if !after_open[..nl].trim().contains(' ') => &after_open[nl + 1..],
        _ => after_open,
    };
    let body = match body.find("```") {
        Some(close) => &body[..close],
        None => body,
    };
    body.trim().to_string()
}

/// Extract the first balanced JSON object from model output.
pub fn extract_json_object(text: &str) -> Option<serde_json::Map<String, Value>> {
    let cleaned = strip_code_fences(text);
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&cleaned) {
        return Some(map);
    }

    let bytes = cleaned.as_bytes();
    let start = cleaned.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    let candidate = &cleaned[start..start + offset + 1];
                    return match serde_json::from_str::<Value>(candidate) {
                        Ok(Value::Object(map)) => Some(map),
                        _ => None,
                    };
                }
            }
            _ => {}
        }
    }
    None
}
