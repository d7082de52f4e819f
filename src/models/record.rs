//! Query and training record types.
//!
//! Field names on the wire follow the JSONL artifacts produced upstream
//! (`"eval question"`, `"initial query"`, ShareGPT-style `{from, value}` turns).

use super::RecordError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One conversation turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    /// Speaker ("human"/"gpt" or "user"/"assistant"); informational only,
    /// turns are paired positionally
    #[serde(alias = "role", default)]
    pub from: String,

    #[serde(alias = "content")]
    pub value: String,
}

impl Turn {
    pub fn new(from: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            value: value.into(),
        }
    }
}

/// A constraint-laden query with its evaluation questions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRecord {
    pub query: String,

    /// Prior user/assistant turns; must have even length
    #[serde(default)]
    pub history: Vec<Turn>,

    #[serde(rename = "eval question", alias = "eval_question", default)]
    pub eval_question: Vec<String>,

    /// Query before any augmentation round
    #[serde(
        rename = "initial query",
        alias = "initial_query",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub initial_query: Option<String>,
}

impl QueryRecord {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            history: Vec::new(),
            eval_question: Vec::new(),
            initial_query: None,
        }
    }

    pub fn with_questions(mut self, questions: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.eval_question = questions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_history(mut self, history: Vec<Turn>) -> Self {
        self.history = history;
        self
    }

    /// History as (user, assistant) pairs.
    ///
    /// Odd-length history cannot be paired and is rejected.
    pub fn history_pairs(&self) -> Result<Vec<(&str, &str)>, RecordError> {
        if self.history.len() % 2 != 0 {
            return Err(RecordError::MalformedHistory {
                len: self.history.len(),
            });
        }
        Ok(self
            .history
            .chunks_exact(2)
            .map(|pair| (pair[0].value.as_str(), pair[1].value.as_str()))
            .collect())
    }
}

/// One extracted constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraint {
    /// Category label, e.g. "Format Constraints"
    pub category: String,
    pub text: String,
    /// The query with this constraint removed
    pub simplified_text: String,
}

/// A query split into its core goal and its constraints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Query {
    Simple,
    Complex {
        basic_goal: String,
        constraints: Vec<Constraint>,
    },
}

impl Query {
    /// Interpret a parsed constraint-extraction reply.
    ///
    /// Expected shape: `{"Complex": false}` or
    /// `{"Complex": true, "Basic Query": "...", "<Category> Constraints": [{"constraint", "simplified query"}]}`.
    pub fn from_extraction(value: &Value) -> Result<Self, RecordError> {
        let map = value
            .as_object()
            .ok_or_else(|| RecordError::schema("extraction reply is not a mapping"))?;

        let complex = match map.get("Complex") {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
            _ => return Err(RecordError::schema("missing 'Complex' flag")),
        };
        if !complex {
            return Ok(Self::Simple);
        }

        let basic_goal = map
            .get("Basic Query")
            .and_then(Value::as_str)
            .ok_or_else(|| RecordError::schema("missing 'Basic Query'"))?
            .to_string();

        let mut constraints = Vec::new();
        for (category, items) in map.iter().filter(|(k, _)| k.ends_with("Constraints")) {
            let items = items
                .as_array()
                .ok_or_else(|| RecordError::schema(format!("'{category}' is not a list")))?;
            for item in items {
                let text = item.get("constraint").and_then(Value::as_str);
                let simplified = item.get("simplified query").and_then(Value::as_str);
                let (Some(text), Some(simplified)) = (text, simplified) else {
                    return Err(RecordError::schema(format!(
                        "constraint in '{category}' lacks 'constraint' or 'simplified query'"
                    )));
                };
                constraints.push(Constraint {
                    category: category.clone(),
                    text: text.to_string(),
                    simplified_text: simplified.to_string(),
                });
            }
        }

        Ok(Self::Complex {
            basic_goal,
            constraints,
        })
    }

    pub fn constraints(&self) -> &[Constraint] {
        match self {
            Self::Simple => &[],
            Self::Complex { constraints, .. } => constraints,
        }
    }
}

/// Constraint-extraction artifact: one line per source record that parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedQuery {
    /// Index of the source record
    pub record: usize,
    pub query: String,
    pub parsed: Query,
}

/// Supervised fine-tuning record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SftRecord {
    pub instruction: String,
    pub output: String,
    pub history: Vec<Turn>,

    /// Only written under `on_unresolved = "emit_flagged"`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints_satisfied: Option<bool>,
}

/// Preference pair record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DpoRecord {
    pub prompt: String,
    pub chosen: String,
    pub rejected: String,
    pub history: Vec<Turn>,
}

/// Training record for the query composer: a simplified query, the original
/// query, and the evaluation question for the dropped constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposerRecord {
    #[serde(rename = "simplified query")]
    pub simplified_query: String,
    pub query: String,
    /// JSON string `{"question": [q]}`
    pub tool: String,
}
