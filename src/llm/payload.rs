// src/llm/payload.rs
//! Extract an embedded JSON payload from free-form model output
//!
//! Models wrap JSON in markdown fences, prepend commentary, or trail off with
//! notes. Every caller that expects structured output goes through
//! [`parse_payload`] and treats its error as "use the fallback".

use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("no JSON payload found in response")]
    NotFound,
    #[error("JSON payload has an unexpected shape: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Locate the JSON object or array embedded in `text`.
pub fn extract_json(text: &str) -> Option<&str> {
    let candidate = fenced_block(text).unwrap_or(text).trim();

    let start = candidate.find(['{', '['])?;
    let close = match candidate.as_bytes()[start] {
        b'{' => '}',
        _ => ']',
    };
    let end = candidate.rfind(close)?;
    if end <= start {
        return None;
    }

    Some(&candidate[start..=end])
}

pub fn parse_payload<T: DeserializeOwned>(text: &str) -> Result<T, PayloadError> {
    let json = extract_json(text).ok_or(PayloadError::NotFound)?;
    Ok(serde_json::from_str(json)?)
}

fn fenced_block(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after_fence = open + 3;
    // skip the language tag line ("json", "python", ...)
    let body_start = text[after_fence..]
        .find('\n')
        .map(|i| after_fence + i + 1)
        .unwrap_or(after_fence);
    let body = &text[body_start..];
    match body.find("```") {
        Some(close) => Some(&body[..close]),
        None => Some(body),
    }
}
