use serde::de::DeserializeOwned;

use crate::error::{AiError, Result};

/// Truncate a string to at most `max_bytes` bytes at a character boundary.
pub fn truncate_to_char_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Strip a surrounding markdown code fence, if any.
pub fn strip_code_blocks(response: &str) -> &str {
    let trimmed = response.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Deserialize a model's text reply, tolerating a code fence around the JSON.
pub fn parse_json_reply<T: DeserializeOwned>(reply: &str) -> Result<T> {
    serde_json::from_str(strip_code_blocks(reply))
        .map_err(|e| AiError::Parse(format!("{e}: {}", truncate_to_char_boundary(reply, 200))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_multibyte_chars() {
        let text = "idée géniale";
        let truncated = truncate_to_char_boundary(text, 3);
        assert!(truncated.len() <= 3);
        assert!(text.starts_with(truncated));
        assert_eq!(truncate_to_char_boundary("short", 100), "short");
    }

    #[test]
    fn fences_are_stripped() {
        assert_eq!(strip_code_blocks("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_blocks("```\n[]\n```"), "[]");
        assert_eq!(strip_code_blocks("  {}  "), "{}");
    }

    #[test]
    fn unparseable_reply_is_a_parse_error() {
        let err = parse_json_reply::<serde_json::Value>("not json").unwrap_err();
        assert!(matches!(err, AiError::Parse(_)));
    }
}
