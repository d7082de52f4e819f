//! Wire types for the batch completion service.
//!
//! Requests and results follow the OpenAI batch file format: one JSON object
//! per line, joined on `custom_id`.

use super::SamplingParams;
use serde::{Deserialize, Serialize};

/// Message in a chat completion request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Chat completion payload of a batch request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestBody {
    pub model: String,
    pub messages: Vec<Message>,
    pub max_tokens: u32,
    pub temperature: f64,
    pub top_p: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

impl RequestBody {
    pub fn new(messages: Vec<Message>, sampling: &SamplingParams) -> Self {
        Self {
            model: sampling.model.clone(),
            messages,
            max_tokens: sampling.max_tokens,
            temperature: sampling.temperature,
            top_p: sampling.top_p,
            stop: sampling.stop.clone(),
        }
    }
}

/// One addressable completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Correlation id, `request-N`
    pub custom_id: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default = "default_url")]
    pub url: String,
    pub body: RequestBody,
}

fn default_method() -> String {
    "POST".to_string()
}

fn default_url() -> String {
    "/v1/chat/completions".to_string()
}

impl CompletionRequest {
    pub fn new(custom_id: String, body: RequestBody) -> Self {
        Self {
            custom_id,
            method: default_method(),
            url: default_url(),
            body,
        }
    }
}

/// One completion result as reported by the service.
///
/// Only `custom_id` and `response.body.choices[0].message.content` are relied
/// on; everything else is optional so partial or error results still load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionResult {
    pub custom_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ResultResponse>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultResponse {
    #[serde(default = "default_status")]
    pub status_code: u16,
    pub body: ResultBody,
}

fn default_status() -> u16 {
    200
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultBody {
    #[serde(default)]
    pub choices: Vec<ResultChoice>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultChoice {
    pub message: ResultMessage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMessage {
    #[serde(default)]
    pub content: Option<String>,
}

impl CompletionResult {
    /// Successful result carrying `content`.
    pub fn success(custom_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            custom_id: custom_id.into(),
            response: Some(ResultResponse {
                status_code: 200,
                body: ResultBody {
                    choices: vec![ResultChoice {
                        message: ResultMessage {
                            content: Some(content.into()),
                        },
                    }],
                },
            }),
            error: None,
        }
    }

    /// `choices[0].message.content`, if present.
    pub fn text(&self) -> Option<&str> {
        self.response
            .as_ref()?
            .body
            .choices
            .first()?
            .message
            .content
            .as_deref()
    }
}

/// Manifest line tying a correlation id to its source record.
///
/// The manifest written next to a request file is the authoritative id
/// assignment; later stages join through it instead of recounting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub custom_id: String,
    /// Index of the source record in its input file
    pub record: usize,
    /// Replica ordinal (or constraint ordinal) within the record
    pub replica: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_text_path() {
        let line = r#"{"custom_id": "request-7", "response": {"status_code": 200,
            "body": {"choices": [{"message": {"role": "assistant", "content": "hello"}}]}}}"#;
        let result: CompletionResult = serde_json::from_str(line).unwrap();
        assert_eq!(result.custom_id, "request-7");
        assert_eq!(result.text(), Some("hello"));
    }

    #[test]
    fn test_result_without_choices_has_no_text() {
        let line = r#"{"custom_id": "request-1", "response": {"body": {"choices": []}}}"#;
        let result: CompletionResult = serde_json::from_str(line).unwrap();
        assert_eq!(result.text(), None);

        let line = r#"{"custom_id": "request-2", "error": {"message": "oom"}}"#;
        let result: CompletionResult = serde_json::from_str(line).unwrap();
        assert_eq!(result.text(), None);
    }

    #[test]
    fn test_request_wire_format() {
        let sampling = SamplingParams::greedy("m");
        let request = CompletionRequest::new(
            "request-1".to_string(),
            RequestBody::new(vec![Message::user("hi")], &sampling),
        );
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["method"], "POST");
        assert_eq!(json["url"], "/v1/chat/completions");
        assert_eq!(json["body"]["messages"][0]["role"], "user");
        assert!(json["body"].get("stop").is_none());
    }
}
