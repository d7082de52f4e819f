//! Prompt assembly.
//!
//! Builds the message lists for every request-building stage from a query,
//! its constraints or evaluation questions, and its conversation history.
//! Template bodies live in `prompts/` and are compiled in.

use crate::models::{Message, QueryRecord, RecordError};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

const RESPONDER_SYSTEM: &str = include_str!("../../prompts/responder_system.md");
const EVALUATE_TEMPLATE: &str = include_str!("../../prompts/evaluate.md");
const EXTRACT_TEMPLATE: &str = include_str!("../../prompts/extract.md");
const QUESTION_TEMPLATE: &str = include_str!("../../prompts/question.md");

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{(query|response|questions|constraint)\}").unwrap());

/// Substitute `{name}` placeholders in a single pass, so substituted text is
/// never re-scanned.
fn fill(template: &str, values: &[(&str, &str)]) -> String {
    PLACEHOLDER
        .replace_all(template.trim(), |caps: &Captures| {
            values
                .iter()
                .find(|(name, _)| *name == &caps[1])
                .map(|(_, value)| (*value).to_string())
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Evaluation questions as a numbered list, one per line.
pub fn numbered_questions(questions: &[String]) -> String {
    questions
        .iter()
        .enumerate()
        .map(|(i, q)| format!("{}. {}\n", i + 1, q))
        .collect()
}

/// Messages asking the responder model to answer `record.query` in context.
///
/// History turns are replayed as alternating user/assistant messages after the
/// system prompt. Odd-length history is rejected.
pub fn resample_messages(record: &QueryRecord) -> Result<Vec<Message>, RecordError> {
    let pairs = record.history_pairs()?;

    let mut messages = Vec::with_capacity(pairs.len() * 2 + 2);
    messages.push(Message::system(RESPONDER_SYSTEM.trim()));
    for (user, assistant) in pairs {
        messages.push(Message::user(user));
        messages.push(Message::assistant(assistant));
    }
    messages.push(Message::user(format!(
        "Now please answer the given query while strictly following its inside constraints.\n[Query] {}",
        record.query
    )));
    Ok(messages)
}

/// Judge prompt over one response and the query's evaluation questions.
pub fn evaluation_messages(query: &str, response: &str, questions: &[String]) -> Vec<Message> {
    let questions = numbered_questions(questions);
    vec![Message::user(fill(
        EVALUATE_TEMPLATE,
        &[
            ("query", query),
            ("response", response),
            ("questions", &questions),
        ],
    ))]
}

/// Constraint-extraction prompt.
pub fn extraction_messages(query: &str) -> Vec<Message> {
    vec![Message::user(fill(EXTRACT_TEMPLATE, &[("query", query)]))]
}

/// Prompt asking for one evaluation question for one constraint.
pub fn question_messages(query: &str, constraint: &str) -> Vec<Message> {
    vec![Message::user(fill(
        QUESTION_TEMPLATE,
        &[("query", query), ("constraint", constraint)],
    ))]
}

/// Composer prompt: the serialized history followed by the query to augment.
pub fn augment_messages(record: &QueryRecord) -> Vec<Message> {
    let content = if record.history.is_empty() {
        format!("[initial query]: {}", record.query)
    } else {
        let history = serde_json::to_string(&record.history).unwrap_or_default();
        format!("[history]: {history} \n [initial query]: {}", record.query)
    };
    vec![Message::user(content)]
}
