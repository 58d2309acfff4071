//! JSON extraction from generation responses
//!
//! Responses are supposed to be bare JSON, but models wrap output in
//! prose and code fences often enough that extraction tries three
//! strategies in order: direct parse, fenced block, brace matching.

use serde_json::Value;

/// Extract the first JSON object or array from a raw response
pub fn extract_json(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }
    if let Some(value) = extract_fenced(trimmed) {
        return Some(value);
    }
    extract_braced(trimmed)
}

/// Pull the contents of the first ```json or bare ``` fence
fn extract_fenced(raw: &str) -> Option<Value> {
    let start = raw.find("```")?;
    let after_fence = &raw[start + 3..];
    // skip an optional language tag on the fence line
    let body_start = after_fence.find('\n')? + 1;
    let body = &after_fence[body_start..];
    let end = body.find("```")?;
    serde_json::from_str(body[..end].trim()).ok()
}

/// Scan for the first balanced `{...}` or `[...]` region
fn extract_braced(raw: &str) -> Option<Value> {
    let open = raw.find(['{', '['])?;
    let bytes = raw.as_bytes();
    let (open_byte, close_byte) = if bytes[open] == b'{' {
        (b'{', b'}')
    } else {
        (b'[', b']')
    };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, &byte) in bytes[open..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b if b == open_byte => depth += 1,
            b if b == close_byte => {
                depth -= 1;
                if depth == 0 {
                    let candidate = &raw[open..=open + offset];
                    return serde_json::from_str(candidate).ok();
                }
            }
            _ => {}
        }
    }
    None
}
