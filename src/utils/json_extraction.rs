//! JSON extraction from LLM responses.
//!
//! Even with `response_format` set, some backends wrap the object in a
//! markdown fence or prepend a sentence. Extraction tries, in order:
//! 1. A ```json fenced block
//! 2. A generic ``` fenced block
//! 3. The content itself when it starts with '{'
//! 4. The first balanced JSON object anywhere in the content
//!
//! Only candidates that parse as JSON are returned. Nothing is repaired.
//!
//! ```
//! use flowforge::utils::json_extraction::try_extract_json_object;
//!
//! let response = "Here you go:\n```json\n{\"name\": \"eth-price\"}\n```";
//! let json = try_extract_json_object(response).into_result().unwrap();
//! assert_eq!(json, "{\"name\": \"eth-price\"}");
//! ```

use thiserror::Error;

/// Error type for JSON extraction failures
#[derive(Debug, Clone, Error, PartialEq)]
pub enum JsonExtractionError {
    #[error("JSON appears truncated: {unclosed_braces} unclosed braces. Partial: {partial_preview}...")]
    Truncated {
        partial_preview: String,
        unclosed_braces: usize,
    },
    #[error("No JSON object found in response. Content starts with: '{content_preview}'")]
    NotFound { content_preview: String },
}

/// Result of a JSON extraction attempt
#[derive(Debug, Clone, PartialEq)]
pub enum JsonExtractionResult {
    /// Successfully extracted valid JSON
    Success(String),
    /// JSON started but never closed
    Truncated {
        partial_json: String,
        unclosed_braces: usize,
    },
    /// No JSON-like content found
    NotFound { content_preview: String },
}

impl JsonExtractionResult {
    /// Returns true if JSON was successfully extracted
    pub fn is_success(&self) -> bool {
        matches!(self, JsonExtractionResult::Success(_))
    }

    /// Converts the result to a Result with a descriptive error
    pub fn into_result(self) -> Result<String, JsonExtractionError> {
        match self {
            JsonExtractionResult::Success(json) => Ok(json),
            JsonExtractionResult::Truncated {
                partial_json,
                unclosed_braces,
            } => Err(JsonExtractionError::Truncated {
                partial_preview: preview(&partial_json, 100),
                unclosed_braces,
            }),
            JsonExtractionResult::NotFound { content_preview } => {
                Err(JsonExtractionError::NotFound { content_preview })
            }
        }
    }
}

fn preview(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

fn parses(candidate: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(candidate)
        .map(|v| v.is_object())
        .unwrap_or(false)
}

/// Extracts a JSON object from an LLM response.
pub fn try_extract_json_object(content: &str) -> JsonExtractionResult {
    let trimmed = content.trim();

    if let Some(json) = extract_from_json_code_block(trimmed) {
        if parses(&json) {
            return JsonExtractionResult::Success(json);
        }
    }

    if let Some(json) = extract_from_generic_code_block(trimmed) {
        if parses(&json) {
            return JsonExtractionResult::Success(json);
        }
    }

    if let Some(start) = trimmed.find('{') {
        let tail = &trimmed[start..];
        if let Some(end) = find_matching_brace(tail) {
            let candidate = &tail[..=end];
            if parses(candidate) {
                return JsonExtractionResult::Success(candidate.to_string());
            }
        } else {
            let unclosed_braces = count_unclosed_braces(tail);
            if unclosed_braces > 0 {
                return JsonExtractionResult::Truncated {
                    partial_json: tail.to_string(),
                    unclosed_braces,
                };
            }
        }
    }

    JsonExtractionResult::NotFound {
        content_preview: preview(trimmed, 50),
    }
}

/// Finds the index of the '}' closing the object that starts at `s[0]`.
///
/// Braces inside string literals (including escaped quotes) are ignored.
pub fn find_matching_brace(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }

    None
}

fn count_unclosed_braces(s: &str) -> usize {
    let mut depth: isize = 0;
    let mut in_string = false;
    let mut escape_next = false;

    for c in s.chars() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => depth -= 1,
            _ => {}
        }
    }

    depth.max(0) as usize
}

/// Extract the body of a ```json ... ``` code block.
pub fn extract_from_json_code_block(content: &str) -> Option<String> {
    let start = content.find("```json")?;
    let body = &content[start + "```json".len()..];
    let end = body.find("```")?;
    Some(body[..end].trim().to_string())
}

/// Extract the body of the first ``` ... ``` code block, skipping a language tag.
pub fn extract_from_generic_code_block(content: &str) -> Option<String> {
    let start = content.find("```")?;
    let after = &content[start + 3..];
    let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after[body_start..];
    let end = body.find("```")?;
    Some(body[..end].trim().to_string())
}
