//! Recovery of structured objects from free-text model output.
//!
//! Candidate spans are produced by an ordered list of pure parse attempts.
//! Each candidate is parsed as JSON (first verbatim, then normalized) and
//! accepted only when every required key is a top-level field. When nothing
//! validates the caller receives a deterministic placeholder instead of an
//! error.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, warn};

type CandidateFn = fn(&str, &[&str]) -> Vec<String>;

const STRATEGIES: &[(&str, CandidateFn)] = &[
    ("fenced_block", fenced_blocks),
    ("smallest_enclosing_span", smallest_spans_with_keys),
    ("largest_top_level_span", largest_top_level_spans),
];

#[derive(Debug, Clone, PartialEq)]
pub struct Extracted<T> {
    pub value: T,
    pub is_placeholder: bool,
}

/// Untyped extraction; the placeholder maps every required key to generic text.
pub fn extract(raw: &str, required_keys: &[&str]) -> (Map<String, Value>, bool) {
    let result = extract_typed(raw, required_keys, || placeholder_object(required_keys));
    (result.value, result.is_placeholder)
}

/// First candidate that has every required key and deserializes into `T` wins.
pub fn extract_typed<T, P>(raw: &str, required_keys: &[&str], placeholder: P) -> Extracted<T>
where
    T: DeserializeOwned,
    P: FnOnce() -> T,
{
    for &(name, strategy) in STRATEGIES {
        for candidate in strategy(raw, required_keys) {
            let Some(object) = parse_candidate(&candidate) else {
                continue;
            };
            if !has_required_keys(&object, required_keys) {
                continue;
            }
            match serde_json::from_value::<T>(Value::Object(object)) {
                Ok(value) => {
                    debug!(strategy = name, "structured output extracted");
                    return Extracted { value, is_placeholder: false };
                }
                Err(err) => {
                    debug!(strategy = name, error = %err, "candidate has required keys but wrong shape");
                }
            }
        }
    }

    warn!(
        required_keys = ?required_keys,
        raw_len = raw.len(),
        "no structured output recovered, using placeholder content"
    );
    Extracted { value: placeholder(), is_placeholder: true }
}

pub fn placeholder_object(required_keys: &[&str]) -> Map<String, Value> {
    required_keys
        .iter()
        .map(|key| {
            (
                key.to_string(),
                Value::String(format!("Content for \"{key}\" is temporarily unavailable.")),
            )
        })
        .collect()
}

fn has_required_keys(object: &Map<String, Value>, required_keys: &[&str]) -> bool {
    required_keys.iter().all(|key| object.contains_key(*key))
}

fn parse_candidate(candidate: &str) -> Option<Map<String, Value>> {
    let trimmed = candidate.trim();
    if trimmed.is_empty() {
        return None;
    }
    let parsed = serde_json::from_str::<Value>(trimmed)
        .or_else(|_| serde_json::from_str::<Value>(&normalize(trimmed)));
    match parsed {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Undoes literal escape sequences left by double encoding, re-escapes raw
/// control characters inside string literals and drops trailing commas.
fn normalize(candidate: &str) -> String {
    remove_trailing_commas(&escape_controls_in_strings(&unescape_literals(candidate)))
}

fn unescape_literals(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.peek().copied() {
            Some('n') => {
                chars.next();
                out.push('\n');
            }
            Some('t') => {
                chars.next();
                out.push('\t');
            }
            Some('"') => {
                chars.next();
                out.push('"');
            }
            Some('\\') => {
                chars.next();
                out.push('\\');
            }
            _ => out.push(ch),
        }
    }
    out
}

fn escape_controls_in_strings(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    for ch in text.chars() {
        if in_string {
            if escaped {
                escaped = false;
                out.push(ch);
                continue;
            }
            match ch {
                '\\' => {
                    escaped = true;
                    out.push(ch);
                }
                '"' => {
                    in_string = false;
                    out.push(ch);
                }
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                _ => out.push(ch),
            }
        } else {
            if ch == '"' {
                in_string = true;
            }
            out.push(ch);
        }
    }
    out
}

fn remove_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    for (i, &ch) in chars.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            out.push(ch);
            continue;
        }
        if ch == '"' {
            in_string = true;
        }
        if ch == ',' {
            let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }
        out.push(ch);
    }
    out
}

fn fenced_blocks(text: &str, _required_keys: &[&str]) -> Vec<String> {
    text.split("```")
        .skip(1)
        .step_by(2)
        .map(|block| {
            let block = block.trim_start_matches([' ', '\t']);
            match block.split_once('\n') {
                Some((info, body)) if is_info_string(info) => body.trim().to_string(),
                _ => block.trim().to_string(),
            }
        })
        .filter(|block| !block.is_empty())
        .collect()
}

fn is_info_string(line: &str) -> bool {
    let line = line.trim();
    !line.is_empty() && line.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[derive(Debug, Clone, Copy)]
struct Span {
    start: usize,
    end: usize,
    depth: usize,
}

impl Span {
    fn len(&self) -> usize {
        self.end - self.start
    }
}

/// Balanced `{...}` spans, ignoring braces inside string literals.
fn brace_spans(text: &str) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut stack: Vec<usize> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' if !stack.is_empty() => in_string = true,
            '{' => stack.push(i),
            '}' => {
                if let Some(start) = stack.pop() {
                    spans.push(Span { start, end: i + 1, depth: stack.len() });
                }
            }
            _ => {}
        }
    }
    spans
}

fn smallest_spans_with_keys(text: &str, required_keys: &[&str]) -> Vec<String> {
    let mut spans: Vec<Span> = brace_spans(text)
        .into_iter()
        .filter(|span| {
            let slice = &text[span.start..span.end];
            required_keys.iter().all(|key| slice.contains(key))
        })
        .collect();
    spans.sort_by_key(Span::len);
    spans
        .into_iter()
        .map(|span| text[span.start..span.end].to_string())
        .collect()
}

fn largest_top_level_spans(text: &str, _required_keys: &[&str]) -> Vec<String> {
    let mut spans: Vec<Span> = brace_spans(text)
        .into_iter()
        .filter(|span| span.depth == 0)
        .collect();
    spans.sort_by_key(|span| std::cmp::Reverse(span.len()));

    let mut candidates: Vec<String> = spans
        .into_iter()
        .map(|span| text[span.start..span.end].to_string())
        .collect();

    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            let widest = text[start..=end].to_string();
            if !candidates.contains(&widest) {
                candidates.push(widest);
            }
        }
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[test]
    fn fenced_json_is_returned_verbatim() {
        let raw = "Here you go:\n```json\n{\"question\": \"What is ownership?\", \"hint\": [1, 2]}\n```\nGood luck!";
        let (object, is_placeholder) = extract(raw, &["question"]);
        assert!(!is_placeholder);
        assert_eq!(
            Value::Object(object),
            json!({"question": "What is ownership?", "hint": [1, 2]})
        );
    }

    #[test]
    fn unparsable_text_yields_complete_placeholder() {
        let (object, is_placeholder) = extract("I cannot help with that.", &["exposition", "thought_questions"]);
        assert!(is_placeholder);
        assert!(object.contains_key("exposition"));
        assert!(object.contains_key("thought_questions"));
    }

    #[test]
    fn placeholder_is_deterministic() {
        assert_eq!(placeholder_object(&["a", "b"]), placeholder_object(&["a", "b"]));
    }

    #[test]
    fn smallest_span_containing_keys_beats_wrapper() {
        let raw = r#"{"meta": {"note": "x"}, "payload": {"evaluation": 1, "feedback": "ok"}"#;
        // outer object is unbalanced, so only the inner spans are candidates
        let (object, is_placeholder) = extract(raw, &["evaluation", "feedback"]);
        assert!(!is_placeholder);
        assert_eq!(object["evaluation"], 1);
    }

    #[test]
    fn missing_required_key_is_rejected() {
        let raw = r#"{"question": "q"}"#;
        let (_, is_placeholder) = extract(raw, &["question", "answer"]);
        assert!(is_placeholder);
    }

    #[test]
    fn inner_object_is_found_inside_wrapper() {
        let raw = r#"{"wrapper": {"question": "q"}}"#;
        let result = extract_typed(raw, &["question"], || json!({"question": "fallback"}));
        // the inner span is itself a valid object carrying the key
        assert!(!result.is_placeholder);
        assert_eq!(result.value, json!({"question": "q"}));
    }

    #[test]
    fn double_escaped_output_is_normalized() {
        let raw = r#"{\"question\": \"Line one\nLine two\"}"#;
        let (object, is_placeholder) = extract(raw, &["question"]);
        assert!(!is_placeholder);
        assert_eq!(object["question"], "Line one\nLine two");
    }

    #[test]
    fn raw_newlines_inside_strings_are_tolerated() {
        let raw = "{\"exposition\": \"para one\n\npara two\"}";
        let (object, is_placeholder) = extract(raw, &["exposition"]);
        assert!(!is_placeholder);
        assert_eq!(object["exposition"], "para one\n\npara two");
    }

    #[test]
    fn trailing_commas_are_dropped() {
        let raw = r#"{"items": [1, 2, 3,], "done": true,}"#;
        let (object, is_placeholder) = extract(raw, &["items", "done"]);
        assert!(!is_placeholder);
        assert_eq!(object["items"], json!([1, 2, 3]));
    }

    #[test]
    fn braces_inside_strings_do_not_split_spans() {
        let raw = r#"Answer: {"feedback": "use {} for blocks", "evaluation": 0.5} done"#;
        let (object, _) = extract(raw, &["feedback", "evaluation"]);
        assert_eq!(object["feedback"], "use {} for blocks");
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Question {
        question: String,
    }

    #[test]
    fn typed_shape_mismatch_falls_back() {
        let raw = r#"{"question": 42}"#;
        let result = extract_typed(raw, &["question"], || Question { question: "default".into() });
        assert!(result.is_placeholder);
        assert_eq!(result.value.question, "default");
    }

    #[test]
    fn fenced_block_without_language_tag() {
        let blocks = fenced_blocks("```\n{\"a\": 1}\n```", &[]);
        assert_eq!(blocks, vec!["{\"a\": 1}".to_string()]);
    }

    #[test]
    fn largest_top_level_span_prefers_outer_object() {
        let spans = largest_top_level_spans(r#"x {"a": {"b": 1}} y {"c": 2}"#, &[]);
        assert_eq!(spans[0], r#"{"a": {"b": 1}}"#);
    }
}
