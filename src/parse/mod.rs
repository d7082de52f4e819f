//! Structured-output parser.
//!
//! Model replies wrap their JSON in prose, code fences, arrays, or Python
//! literal syntax. Parsing is a prioritized chain of total functions
//! `&str -> Option<Value>`:
//!
//! 1. Narrow to the first fenced block (```` ```json ... ``` ```` or ```` ``` ... ``` ````).
//! 2. Build candidates: the outer `[...]` rewritten to `{...}`, then the
//!    outermost `{...}` span. With neither, the narrowed text itself.
//! 3. Strict JSON, then the Python-literal fallback ([`literal`]), on each
//!    candidate in turn.
//!
//! `None` means unusable. Nothing here panics or returns an error.

mod augmented;
pub mod literal;

pub use augmented::*;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

// Non-greedy, first match only
static FENCED_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```json(.*?)```|```(.*?)```").unwrap());

/// One fallback step of the chain.
type Step = fn(&str) -> Option<Value>;

const STEPS: &[Step] = &[parse_json, literal::parse];

/// Parse the structured object embedded in `text`.
pub fn parse_structured(text: &str) -> Option<Value> {
    candidates(text)
        .iter()
        .find_map(|candidate| STEPS.iter().find_map(|step| step(candidate)))
}

/// Inner content of the first fenced block, if any.
pub fn fenced_block(text: &str) -> Option<&str> {
    let captures = FENCED_BLOCK.captures(text)?;
    captures.get(1).or_else(|| captures.get(2)).map(|m| m.as_str())
}

/// Steps 1-2: candidate object strings, in the order they are tried.
fn candidates(text: &str) -> Vec<String> {
    let narrowed = fenced_block(text).unwrap_or(text).trim();
    let mut out = Vec::with_capacity(2);

    if let Some(inner) = narrowed
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
    {
        out.push(format!("{{{inner}}}"));
    }
    if let Some(braces) = outermost_braces(narrowed) {
        out.push(braces.to_string());
    }
    if out.is_empty() {
        out.push(narrowed.to_string());
    }
    out
}

/// Span from the first `{` to the last `}`.
fn outermost_braces(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}

fn parse_json(candidate: &str) -> Option<Value> {
    serde_json::from_str(candidate).ok()
}
