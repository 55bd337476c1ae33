use crate::error::{Result, SignalError};
use crate::llm::client::{ChatClient, TextStream};
use crate::prompt::build_prompt;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const RESPONSE_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Body of a chat request. Both fields stay loosely typed: the question is
/// validated here and the summary is dispatched on by the prompt formatter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub question: Value,
    #[serde(default)]
    pub metrics_summary: Value,
}

impl ChatRequest {
    pub fn new(question: impl Into<String>, metrics_summary: Value) -> Self {
        Self {
            question: Value::String(question.into()),
            metrics_summary,
        }
    }

    pub fn from_json(body: &str) -> Result<Self> {
        serde_json::from_str(body)
            .map_err(|_| SignalError::BadRequest("invalid JSON".to_string()))
    }

    /// Trimmed question text; anything but a non-blank string is `None`.
    pub fn normalized_question(&self) -> Option<&str> {
        self.question
            .as_str()
            .map(str::trim)
            .filter(|q| !q.is_empty())
    }
}

/// Validates the request, builds the prompt and starts the provider stream.
pub async fn handle_chat_request(client: &ChatClient, request: &ChatRequest) -> Result<TextStream> {
    let question = request
        .normalized_question()
        .ok_or_else(|| SignalError::BadRequest("question required".to_string()))?;
    let prompt = build_prompt(question, &request.metrics_summary);
    debug!("Built prompt of {} chars", prompt.len());
    Ok(client.stream_completion(&prompt).await)
}

/// [`handle_chat_request`] for a raw JSON body.
pub async fn handle_chat(client: &ChatClient, body: &str) -> Result<TextStream> {
    let request = ChatRequest::from_json(body)?;
    handle_chat_request(client, &request).await
}
