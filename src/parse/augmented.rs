//! Recovery of the composer's two-field reply:
//! `{"augmented query": "...", "question": ["..."]}`.
//!
//! Composer models routinely put unescaped double quotes inside the query
//! text, which no parser accepts. After the generic chain fails, the fields
//! are cut out by position and re-encoded.

use super::{fenced_block, parse_structured};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

const QUERY_KEY: &str = "augmented query";
const QUESTION_KEY: &str = "question";

/// The composer's augmented query and the evaluation questions it added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AugmentedQuery {
    #[serde(rename = "augmented query")]
    pub augmented_query: String,
    pub question: Vec<String>,
}

/// A recovered reply plus its canonical JSON encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AugmentedParse {
    pub value: AugmentedQuery,
    pub canonical: String,
}

impl AugmentedParse {
    fn new(value: AugmentedQuery) -> Self {
        let canonical = json!({
            QUERY_KEY: value.augmented_query,
            QUESTION_KEY: value.question,
        })
        .to_string();
        Self { value, canonical }
    }
}

/// Parse a composer reply, falling back to positional slicing.
pub fn parse_augmented(text: &str) -> Option<AugmentedParse> {
    parse_structured(text)
        .and_then(|value| from_value(&value))
        .or_else(|| slice_fields(text))
        .map(AugmentedParse::new)
}

fn from_value(value: &Value) -> Option<AugmentedQuery> {
    let augmented_query = value.get(QUERY_KEY)?.as_str()?.to_string();
    let question = match value.get(QUESTION_KEY)? {
        Value::String(q) => vec![q.clone()],
        Value::Array(items) => items
            .iter()
            .map(|q| q.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()?,
        _ => return None,
    };
    Some(AugmentedQuery {
        augmented_query,
        question,
    })
}

/// Cut `"augmented query": "<q>", "question": ["<x>"]` apart by position.
///
/// Inner double quotes become single quotes so the result re-encodes cleanly.
fn slice_fields(text: &str) -> Option<AugmentedQuery> {
    let body = fenced_block(text).unwrap_or(text).trim();
    let body = body.strip_prefix('{')?.strip_suffix('}')?;

    let (head, tail) = body.split_once(&format!("\"{QUESTION_KEY}\":"))?;
    let (_, query) = head.split_once(&format!("\"{QUERY_KEY}\":"))?;

    let query = unquote(query.trim().trim_end_matches(',').trim())?;
    let question = tail.trim().trim_end_matches(',').trim();
    let question = question
        .strip_prefix('[')
        .and_then(|q| q.strip_suffix(']'))
        .unwrap_or(question)
        .trim();
    let question = unquote(question)?;

    if query.is_empty() {
        return None;
    }
    Some(AugmentedQuery {
        augmented_query: query,
        question: vec![question],
    })
}

fn unquote(field: &str) -> Option<String> {
    let inner = field.strip_prefix('"')?.strip_suffix('"')?;
    Some(inner.replace('"', "'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_well_formed_reply() {
        let text = "```json\n{\"augmented query\": \"Explain rust in 3 bullets.\", \"question\": [\"Does the response use exactly 3 bullets?\"]}\n```";
        let parsed = parse_augmented(text).unwrap();
        assert_eq!(parsed.value.augmented_query, "Explain rust in 3 bullets.");
        assert_eq!(
            parsed.value.question,
            vec!["Does the response use exactly 3 bullets?"]
        );
        let round: AugmentedQuery = serde_json::from_str(&parsed.canonical).unwrap();
        assert_eq!(round, parsed.value);
    }

    #[test]
    fn test_question_as_plain_string() {
        let text = r#"{"augmented query": "q", "question": "Is it short?"}"#;
        let parsed = parse_augmented(text).unwrap();
        assert_eq!(parsed.value.question, vec!["Is it short?"]);
    }

    #[test]
    fn test_stray_quotes_recovered_by_slicing() {
        let text = "```json\n{\n  \"augmented query\": \"Write a poem titled \"Rain\" in 4 lines.\",\n  \"question\": [\"Is the poem titled \"Rain\"?\"]\n}\n```";
        let parsed = parse_augmented(text).unwrap();
        assert_eq!(
            parsed.value.augmented_query,
            "Write a poem titled 'Rain' in 4 lines."
        );
        assert_eq!(parsed.value.question, vec!["Is the poem titled 'Rain'?"]);
        assert!(parsed.canonical.contains("\"augmented query\""));
        let reparsed: Value = serde_json::from_str(&parsed.canonical).unwrap();
        assert_eq!(reparsed["question"][0], "Is the poem titled 'Rain'?");
    }

    #[test]
    fn test_unrecoverable() {
        assert_eq!(parse_augmented("I cannot help with that."), None);
        assert_eq!(parse_augmented(r#"{"question": ["x"]}"#), None);
        assert_eq!(parse_augmented(r#"{"augmented query": "", "question": "x"#), None);
    }
}
