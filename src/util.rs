//! Shared helpers: run ids, slugs and tolerant JSON extraction from agent
//! output.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use serde::de::DeserializeOwned;

static RUN_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("run id pattern is valid")
});

/// Fresh run identifier: the first 8 hex digits of a v4 UUID.
pub fn new_run_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Run ids double as directory names, so only a safe alphabet is allowed.
pub fn is_valid_run_id(run_id: &str) -> bool {
    RUN_ID_RE.is_match(run_id)
}

/// Lowercase, hyphen-separated slug of at most `max_len` bytes.
pub fn slugify(title: &str, max_len: usize) -> String {
    let slug = title
        .to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    if slug.len() <= max_len {
        return slug;
    }
    slug[..max_len].trim_end_matches('-').to_string()
}

/// Extract a JSON object from text that may contain other content.
/// Uses brace-counting to find the outermost JSON object, ignoring braces
/// inside string literals.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text[start..].char_indices() {
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
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse the first JSON object found in agent output into `T`.
pub fn parse_agent_json<T: DeserializeOwned>(output: &str) -> Result<T> {
    let json = extract_json_object(output).context("No JSON object in agent output")?;
    serde_json::from_str(json).context("Agent JSON did not match the expected shape")
}

/// Keep the tail of long tool output for error messages.
pub fn tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.trim().to_string();
    }
    let tail: String = text.chars().skip(count - max_chars).collect();
    format!("...{}", tail.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_new_run_id_shape() {
        let a = new_run_id();
        let b = new_run_id();
        assert_eq!(a.len(), 8);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
        assert!(is_valid_run_id(&a));
    }

    #[test]
    fn test_run_id_validation_rejects_paths() {
        assert!(is_valid_run_id("run_2024-01"));
        assert!(!is_valid_run_id("../etc"));
        assert!(!is_valid_run_id("a/b"));
        assert!(!is_valid_run_id(""));
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Fix login: crash on Safari!", 40), "fix-login-crash-on-safari");
        assert_eq!(slugify("Add a really long feature title", 12), "add-a-really");
        assert_eq!(slugify("Add a  b", 6), "add-a");
        assert_eq!(slugify("---", 10), "");
    }

    #[test]
    fn test_extract_json_object_with_prefix_and_suffix() {
        let text = r#"Here you go: {"key": "value"} hope it helps"#;
        assert_eq!(extract_json_object(text), Some(r#"{"key": "value"}"#));
    }

    #[test]
    fn test_extract_json_object_nested() {
        let text = r#"{"outer": {"inner": "value"}}"#;
        assert_eq!(extract_json_object(text), Some(text));
    }

    #[test]
    fn test_extract_json_object_ignores_braces_in_strings() {
        let text = r#"{"code": "fn main() { }", "ok": true} trailing }"#;
        assert_eq!(extract_json_object(text), Some(r#"{"code": "fn main() { }", "ok": true}"#));
    }

    #[test]
    fn test_extract_json_object_unclosed_or_absent() {
        assert_eq!(extract_json_object(r#"{"key": "value""#), None);
        assert_eq!(extract_json_object("No JSON here"), None);
    }

    #[test]
    fn test_parse_agent_json() {
        #[derive(Deserialize)]
        struct Verdict {
            accepted: bool,
        }
        let v: Verdict = parse_agent_json("```json\n{\"accepted\": true}\n```").unwrap();
        assert!(v.accepted);
        assert!(parse_agent_json::<Verdict>("nothing").is_err());
        assert!(parse_agent_json::<Verdict>("{\"other\": 1}").is_err());
    }

    #[test]
    fn test_tail() {
        assert_eq!(tail("short", 10), "short");
        assert_eq!(tail("abcdefghij", 3), "...hij");
    }
}
