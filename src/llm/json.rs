//! Pulling JSON out of model replies.
//!
//! Models wrap JSON in markdown fences or surround it with prose. Extraction
//! tries, in order: the whole reply, a fenced block, then the first balanced
//! object or array found by bracket matching.

use serde::de::DeserializeOwned;

use crate::error::LlmError;

/// Returns the JSON text embedded in `content`, if any.
pub fn extract_json(content: &str) -> Option<&str> {
    let trimmed = content.trim();
    if (trimmed.starts_with('{') || trimmed.starts_with('['))
        && serde_json::from_str::<serde_json::Value>(trimmed).is_ok()
    {
        return Some(trimmed);
    }

    if let Some(fenced) = fenced_block(trimmed) {
        return Some(fenced);
    }

    balanced_span(trimmed)
}

/// Extracts and deserializes JSON from a model reply.
pub fn parse_json<T: DeserializeOwned>(content: &str) -> Result<T, LlmError> {
    let json = extract_json(content).ok_or_else(|| {
        let preview: String = content.chars().take(80).collect();
        LlmError::ParseError(format!("no JSON found in reply starting with '{}'", preview))
    })?;
    serde_json::from_str(json).map_err(|e| LlmError::ParseError(e.to_string()))
}

fn fenced_block(content: &str) -> Option<&str> {
    let start = content.find("```")?;
    let after_fence = &content[start + 3..];
    let body_start = after_fence.find('\n')? + 1;
    let body = &after_fence[body_start..];
    let end = body.find("```")?;
    let block = body[..end].trim();
    if block.starts_with('{') || block.starts_with('[') {
        Some(block)
    } else {
        None
    }
}

/// First `{...}` or `[...]` span whose brackets balance, ignoring string contents.
fn balanced_span(content: &str) -> Option<&str> {
    let start = content.find(['{', '['])?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in content[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&content[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}
