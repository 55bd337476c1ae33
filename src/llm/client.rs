use crate::llm::config::{AzureConfig, OpenAiConfig, ProviderConfig};
use crate::tables::END_MARKER;
use futures::stream::{self, BoxStream, StreamExt};
use log::{info, warn};
use reqwest::{Client, RequestBuilder, Response};
use serde_json::{json, Value};

const OPENAI_COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";
const SYSTEM_MESSAGE: &str = "You are a helpful assistant for apparel BI.";
const TEMPERATURE: f64 = 0.7;
const MAX_TOKENS: u32 = 512;
const ERROR_BODY_CHARS: usize = 400;
const MOCK_EXCERPT_CHARS: usize = 120;

/// Plain text chunks as they arrive from the provider, always closed by the
/// `@@END@@` trailer.
pub type TextStream = BoxStream<'static, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Azure,
    OpenAi,
    Mock,
    Error,
}

impl ProviderKind {
    pub fn name(&self) -> &'static str {
        match self {
            ProviderKind::Azure => "azure",
            ProviderKind::OpenAi => "openai",
            ProviderKind::Mock => "mock",
            ProviderKind::Error => "error",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ProviderKind::Azure => "Azure OpenAI",
            ProviderKind::OpenAi => "OpenAI",
            ProviderKind::Mock => "Mock",
            ProviderKind::Error => "Error",
        }
    }
}

pub fn end_trailer(provider: ProviderKind) -> String {
    format!("\n{}{}", END_MARKER, json!({ "provider": provider.name() }))
}

/// Incremental decoder for server-sent chat completion events. Bytes are
/// buffered until a full line is available, so multi-byte characters split
/// across network chunks survive.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Feeds a network chunk and returns the content deltas it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut pieces = Vec::new();
        while let Some(idx) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=idx).collect();
            let line = String::from_utf8_lossy(&line);
            pieces.extend(parse_event_line(line.trim()));
        }
        pieces
    }
}

fn parse_event_line(line: &str) -> Vec<String> {
    let Some(payload) = line.strip_prefix("data:").map(str::trim) else {
        return Vec::new();
    };
    if payload.is_empty() || payload == "[DONE]" {
        return Vec::new();
    }
    // Keep-alives and other non-JSON payloads are dropped.
    let Ok(event) = serde_json::from_str::<Value>(payload) else {
        return Vec::new();
    };

    event
        .get("choices")
        .and_then(Value::as_array)
        .map(|choices| {
            choices
                .iter()
                .filter_map(|choice| {
                    let delta = choice
                        .get("delta")
                        .or_else(|| choice.get("message"))
                        .unwrap_or(choice);
                    delta.get("content").and_then(Value::as_str)
                })
                .filter(|content| !content.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn sse_text_stream(response: Response, provider: ProviderKind) -> TextStream {
    let deltas = response
        .bytes_stream()
        .scan(SseDecoder::default(), move |decoder, chunk| {
            let next = match chunk {
                Ok(bytes) => Some(stream::iter(decoder.push(&bytes))),
                Err(e) => {
                    warn!("{} stream interrupted: {}", provider.label(), e);
                    None
                }
            };
            futures::future::ready(next)
        })
        .flatten();
    deltas
        .chain(stream::once(futures::future::ready(end_trailer(provider))))
        .boxed()
}

pub fn error_stream(message: &str) -> TextStream {
    stream::iter(vec![
        format!("PROVIDER ERROR:\n{}", message),
        end_trailer(ProviderKind::Error),
    ])
    .boxed()
}

pub fn mock_stream(prompt: &str) -> TextStream {
    let excerpt: String = prompt.chars().take(MOCK_EXCERPT_CHARS).collect();
    stream::iter(vec![
        format!("MOCK RESPONSE\nPrompt excerpt: {}...", excerpt),
        end_trailer(ProviderKind::Mock),
    ])
    .boxed()
}

async fn read_error_body(response: Response) -> String {
    match response.text().await {
        Ok(text) if text.is_empty() => "(no body)".to_string(),
        Ok(text) => text.chars().take(ERROR_BODY_CHARS).collect(),
        Err(_) => "(unreadable error body)".to_string(),
    }
}

fn chat_body(model: &str, prompt: &str) -> Value {
    json!({
        "model": model,
        "messages": [
            { "role": "system", "content": SYSTEM_MESSAGE },
            { "role": "user", "content": prompt }
        ],
        "temperature": TEMPERATURE,
        "max_tokens": MAX_TOKENS,
        "stream": true
    })
}

#[derive(Clone)]
pub struct ChatClient {
    client: Client,
    config: ProviderConfig,
}

impl ChatClient {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    pub fn from_env() -> Self {
        Self::new(ProviderConfig::from_env())
    }

    /// The provider that [`ChatClient::stream_completion`] will call.
    pub fn provider(&self) -> ProviderKind {
        if self.config.azure.is_some() {
            ProviderKind::Azure
        } else if self.config.openai.is_some() {
            ProviderKind::OpenAi
        } else {
            ProviderKind::Mock
        }
    }

    /// Streams the model's answer to `prompt`. Provider failures are reported
    /// in-band as a `PROVIDER ERROR:` stream rather than as an `Err`.
    pub async fn stream_completion(&self, prompt: &str) -> TextStream {
        let provider = self.provider();
        info!("Dispatching prompt to {} provider", provider.name());
        match (&self.config.azure, &self.config.openai) {
            (Some(azure), _) => self.stream_from_azure(azure, prompt).await,
            (None, Some(openai)) => self.stream_from_openai(openai, prompt).await,
            (None, None) => mock_stream(prompt),
        }
    }

    async fn stream_from_azure(&self, azure: &AzureConfig, prompt: &str) -> TextStream {
        let request = self
            .client
            .post(azure.completions_url())
            .header("api-key", &azure.key)
            .json(&chat_body(&azure.deployment, prompt));
        self.dispatch(request, ProviderKind::Azure).await
    }

    async fn stream_from_openai(&self, openai: &OpenAiConfig, prompt: &str) -> TextStream {
        let request = self
            .client
            .post(OPENAI_COMPLETIONS_URL)
            .bearer_auth(&openai.key)
            .json(&chat_body(&openai.model, prompt));
        self.dispatch(request, ProviderKind::OpenAi).await
    }

    async fn dispatch(&self, request: RequestBuilder, provider: ProviderKind) -> TextStream {
        let label = provider.label();
        let sent = tokio::time::timeout(self.config.request_timeout, request.send()).await;
        let response = match sent {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!("{} request failed: {}", label, e);
                return error_stream(&format!("{} fetch failed: {}", label, e));
            }
            Err(_) => {
                warn!("{} request timed out", label);
                return error_stream(&format!(
                    "{} fetch failed: no response within {}s",
                    label,
                    self.config.request_timeout.as_secs()
                ));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let reason = status.canonical_reason().unwrap_or("");
            let body = read_error_body(response).await;
            warn!("{} returned status {}", label, status.as_u16());
            return error_stream(&format!(
                "{} error {}: {}. {}",
                label,
                status.as_u16(),
                reason,
                body
            ));
        }
        sse_text_stream(response, provider)
    }
}
