//! Pulling a JSON object out of a model reply.
//!
//! Models wrap structured output in prose, markdown fences or reasoning text
//! even when asked not to. Candidates are tried in this order:
//!
//! 1. a ```` ```json ```` fenced block
//! 2. any other fenced block
//! 3. the whole reply
//! 4. the last balanced `{...}` in the reply
//! 5. the first balanced `{...}` in the reply
//!
//! The first candidate that parses as a JSON object wins. When none does but
//! an object was opened and never closed, the reply is reported as truncated
//! so callers can tell a cut-off answer from a refusal.
//!
//! # Example
//!
//! ```
//! use commitlens::utils::json_extraction::extract_json_object;
//!
//! let reply = "Sure! Here it is:\n```json\n{\"summary\": \"ok\"}\n```";
//! assert_eq!(extract_json_object(reply).unwrap(), "{\"summary\": \"ok\"}");
//! ```

use serde::de::DeserializeOwned;
use thiserror::Error;

const PREVIEW_CHARS: usize = 80;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JsonExtractionError {
    #[error("JSON appears truncated: {unclosed_braces} unclosed braces, {unclosed_brackets} unclosed brackets")]
    Truncated {
        unclosed_braces: usize,
        unclosed_brackets: usize,
    },

    #[error("No JSON object found in response starting with '{content_preview}'")]
    NotFound { content_preview: String },

    #[error("JSON does not match the expected shape: {0}")]
    Invalid(String),
}

/// Returns the first JSON object candidate in `content` that parses.
pub fn extract_json_object(content: &str) -> Result<String, JsonExtractionError> {
    let trimmed = content.trim();

    let fenced = [
        extract_fenced_block(trimmed, Some("json")),
        extract_fenced_block(trimmed, None),
    ];
    // Reasoning models quote fragments before the final answer, so the last
    // complete object is tried before the first.
    let last = last_complete_object(trimmed);
    let first = trimmed
        .find('{')
        .and_then(|start| balanced_object_at(trimmed, start));

    for candidate in fenced
        .into_iter()
        .chain([Some(trimmed), last, first])
        .flatten()
    {
        if is_json_object(candidate) {
            return Ok(candidate.to_string());
        }
    }

    if let Some(start) = trimmed.find('{') {
        let structure = analyze_structure(&trimmed[start..]);
        if structure.unclosed_braces > 0 || structure.unclosed_brackets > 0 || structure.in_string {
            return Err(JsonExtractionError::Truncated {
                unclosed_braces: structure.unclosed_braces,
                unclosed_brackets: structure.unclosed_brackets,
            });
        }
    }

    Err(JsonExtractionError::NotFound {
        content_preview: trimmed.chars().take(PREVIEW_CHARS).collect(),
    })
}

/// Extracts the first JSON object in `content` and deserializes it.
pub fn parse_json_reply<T: DeserializeOwned>(content: &str) -> Result<T, JsonExtractionError> {
    let json = extract_json_object(content)?;
    serde_json::from_str(&json).map_err(|e| JsonExtractionError::Invalid(e.to_string()))
}

/// Body of the first fenced code block, optionally requiring a language tag.
pub fn extract_fenced_block<'a>(content: &'a str, language: Option<&str>) -> Option<&'a str> {
    let mut search = content;
    while let Some(open) = search.find("```") {
        let after_fence = &search[open + 3..];
        let line_end = after_fence.find('\n')?;
        let tag = after_fence[..line_end].trim();
        let body_start = &after_fence[line_end + 1..];
        let close = body_start.find("```")?;

        let tag_matches = match language {
            Some(lang) => tag.eq_ignore_ascii_case(lang),
            None => true,
        };
        if tag_matches {
            return Some(body_start[..close].trim());
        }
        search = &body_start[close + 3..];
    }
    None
}

/// Index of the brace closing the object that opens at byte 0 of `s`.
///
/// Braces inside string literals (including escaped quotes) are ignored.
pub fn find_matching_brace(s: &str) -> Option<usize> {
    if !s.starts_with('{') {
        return None;
    }

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in s.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn balanced_object_at(s: &str, start: usize) -> Option<&str> {
    let end = find_matching_brace(&s[start..])?;
    Some(&s[start..=start + end])
}

/// The last top-level object that parses, scanning every opening brace.
fn last_complete_object(s: &str) -> Option<&str> {
    let mut found = None;
    let mut offset = 0;
    while let Some(pos) = s[offset..].find('{') {
        let start = offset + pos;
        match balanced_object_at(s, start) {
            Some(candidate) if is_json_object(candidate) => {
                found = Some(candidate);
                offset = start + candidate.len();
            }
            _ => offset = start + 1,
        }
    }
    found
}

fn is_json_object(candidate: &str) -> bool {
    matches!(
        serde_json::from_str::<serde_json::Value>(candidate),
        Ok(serde_json::Value::Object(_))
    )
}

#[derive(Debug, Default)]
struct Structure {
    unclosed_braces: usize,
    unclosed_brackets: usize,
    in_string: bool,
}

fn analyze_structure(s: &str) -> Structure {
    let mut braces = 0usize;
    let mut brackets = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for c in s.chars() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => braces += 1,
            '}' => braces = braces.saturating_sub(1),
            '[' => brackets += 1,
            ']' => brackets = brackets.saturating_sub(1),
            _ => {}
        }
    }

    Structure {
        unclosed_braces: braces,
        unclosed_brackets: brackets,
        in_string,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_plain_object() {
        assert_eq!(
            extract_json_object("  {\"a\": 1}  ").expect("json"),
            "{\"a\": 1}"
        );
    }

    #[test]
    fn test_json_fence_preferred_over_other_fences() {
        let reply = "```text\nnot json\n```\nthen\n```json\n{\"summary\": \"s\"}\n```";
        assert_eq!(extract_json_object(reply).expect("json"), "{\"summary\": \"s\"}");
    }

    #[test]
    fn test_untagged_fence() {
        let reply = "Result:\n```\n{\"ok\": true}\n```";
        assert_eq!(extract_json_object(reply).expect("json"), "{\"ok\": true}");
    }

    #[test]
    fn test_last_object_wins_after_reasoning() {
        let reply = "I considered {\"draft\": 1} first.\nFinal answer: {\"final\": 2}";
        assert_eq!(extract_json_object(reply).expect("json"), "{\"final\": 2}");
    }

    #[test]
    fn test_nested_and_string_braces() {
        let reply = r#"Answer: {"summary": "uses { and } in text", "nested": {"a": [1, 2]}} done"#;
        let json = extract_json_object(reply).expect("json");
        let value: serde_json::Value = serde_json::from_str(&json).expect("parse");
        assert_eq!(value["nested"]["a"][1], 2);
    }

    #[test]
    fn test_truncated_reply() {
        let err = extract_json_object("{\"summary\": \"cut off\", \"patterns\": [\"a\"").unwrap_err();
        assert_eq!(
            err,
            JsonExtractionError::Truncated {
                unclosed_braces: 1,
                unclosed_brackets: 1
            }
        );
    }

    #[test]
    fn test_no_json() {
        let err = extract_json_object("I cannot review this commit.").unwrap_err();
        assert!(matches!(err, JsonExtractionError::NotFound { ref content_preview } if content_preview.starts_with("I cannot")));
    }

    #[test]
    fn test_arrays_are_not_objects() {
        assert!(extract_json_object("[1, 2, 3]").is_err());
    }

    #[test]
    fn test_find_matching_brace() {
        assert_eq!(find_matching_brace("{}"), Some(1));
        assert_eq!(find_matching_brace(r#"{"a": "\"}"}"#), Some(11));
        assert_eq!(find_matching_brace("{ {"), None);
        assert_eq!(find_matching_brace("x{}"), None);
    }

    #[test]
    fn test_parse_json_reply() {
        #[derive(Deserialize)]
        struct Reply {
            summary: String,
        }

        let reply: Reply = parse_json_reply("```json\n{\"summary\": \"fine\"}\n```").expect("reply");
        assert_eq!(reply.summary, "fine");

        let err = parse_json_reply::<Reply>("{\"other\": 1}").err().expect("error");
        assert!(matches!(err, JsonExtractionError::Invalid(_)));
    }
}
