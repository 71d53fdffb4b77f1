//! OpenRouter chat-completions client, the reference [`TextCompletion`]
//! backend.
//!
//! Each prompt is sent as a single user message, optionally preceded by a
//! configured system prompt. Token counts use a chars-per-token estimate
//! because the API offers no tokenizer endpoint.

use super::backend::{BackendFuture, DeltaSink, TextCompletion};
use super::streaming::{StreamEvent, collect_text, extract_usage};
use crate::context::budget::{DEFAULT_CHARS_PER_TOKEN, estimate_tokens};
use crate::error::BackendError;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

// ── Constants ──────────────────────────────────────────────────────

pub const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Default model for all LLM calls.
pub const DEFAULT_MODEL: &str = "z-ai/glm-5";

/// Context window assumed when none is configured.
pub const DEFAULT_MAX_CONTEXT: usize = 128_000;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

// ── Request types ──────────────────────────────────────────────────

/// Chat completion request body. Unused optional fields are omitted from
/// serialization.
#[derive(Serialize, Debug, Default)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "is_zero_u32")]
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "is_zero_f32")]
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}
fn is_zero_f32(v: &f32) -> bool {
    *v == 0.0
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

// ── Response types ─────────────────────────────────────────────────

/// Token usage reported by the API.
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct UsageInfo {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

#[derive(Deserialize, Debug)]
struct RawChatResponse {
    choices: Option<Vec<RawChoice>>,
    usage: Option<UsageInfo>,
    error: Option<ApiError>,
}

#[derive(Deserialize, Debug)]
struct RawChoice {
    message: RawMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct RawMessage {
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ApiError {
    message: String,
    code: Option<u16>,
}

/// Parsed result of a chat completion.
#[derive(Debug, Clone)]
pub struct ChatCompletion {
    pub content: Option<String>,
    pub usage: Option<UsageInfo>,
    pub finish_reason: Option<String>,
}

// ── Client ─────────────────────────────────────────────────────────

/// Generation settings applied to every request.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub model: String,
    pub url: String,
    pub system_prompt: Option<String>,
    pub temperature: f32,
    /// Completion limit used when a call does not pass its own.
    pub max_tokens: u32,
    pub max_context: usize,
    pub chars_per_token: f64,
    pub referer: String,
    pub title: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            url: OPENROUTER_URL.to_string(),
            system_prompt: None,
            temperature: 0.7,
            max_tokens: 4096,
            max_context: DEFAULT_MAX_CONTEXT,
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
            referer: "https://github.com/entropic-rs/entropic".to_string(),
            title: "entropic".to_string(),
        }
    }
}

impl ClientConfig {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_max_context(mut self, tokens: usize) -> Self {
        self.max_context = tokens;
        self
    }

    pub fn with_max_tokens(mut self, tokens: u32) -> Self {
        self.max_tokens = tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

pub struct OpenRouterClient {
    pub(crate) client: reqwest::Client,
    pub(crate) api_key: String,
    pub(crate) config: ClientConfig,
}

impl OpenRouterClient {
    pub fn new(api_key: impl Into<String>, config: ClientConfig) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("entropic/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| BackendError::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            config,
        })
    }

    /// Read the API key from `OPENROUTER_KEY`.
    pub fn from_env(config: ClientConfig) -> Result<Self, BackendError> {
        let api_key = std::env::var("OPENROUTER_KEY")
            .map_err(|_| BackendError::InvalidRequest("OPENROUTER_KEY not set".into()))?;
        Self::new(api_key, config)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Request body for a single prompt.
    pub fn request_for(&self, prompt: &str, max_tokens: Option<u32>) -> ChatRequest {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.config.system_prompt {
            messages.push(Message::system(system.clone()));
        }
        messages.push(Message::user(prompt));
        ChatRequest {
            model: self.config.model.clone(),
            messages,
            max_tokens: max_tokens.unwrap_or(self.config.max_tokens),
            temperature: self.config.temperature,
            ..Default::default()
        }
    }

    pub(crate) fn post(&self, body: &impl Serialize) -> reqwest::RequestBuilder {
        self.client
            .post(self.config.url.as_str())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("HTTP-Referer", &self.config.referer)
            .header("X-Title", &self.config.title)
            .json(body)
    }

    /// Send a chat completion request.
    pub async fn chat(&self, body: &ChatRequest) -> Result<ChatCompletion, BackendError> {
        debug!(
            "LLM request: model={}, messages={}, max_tokens={}, temp={}",
            body.model,
            body.messages.len(),
            body.max_tokens,
            body.temperature,
        );
        trace!(
            "Request payload size: {} bytes",
            serde_json::to_string(body).map_or(0, |s| s.len())
        );

        let start = Instant::now();
        let resp = self.post(body).send().await.map_err(request_error)?;

        let status = resp.status();
        let text = resp.text().await.map_err(request_error)?;

        debug!(
            "LLM response: HTTP {} in {:.1}s ({} bytes)",
            status,
            start.elapsed().as_secs_f64(),
            text.len()
        );

        if !status.is_success() {
            return Err(BackendError::Http {
                status: status.as_u16(),
                body: text,
            });
        }

        parse_chat_response(&text)
    }
}

pub(crate) fn request_error(e: reqwest::Error) -> BackendError {
    if e.is_timeout() {
        BackendError::Timeout(REQUEST_TIMEOUT)
    } else {
        BackendError::Request(e.to_string())
    }
}

fn parse_chat_response(text: &str) -> Result<ChatCompletion, BackendError> {
    let parsed: RawChatResponse =
        serde_json::from_str(text).map_err(|e| BackendError::Parse(e.to_string()))?;

    if let Some(err) = parsed.error {
        return Err(match err.code {
            Some(status) => BackendError::Http {
                status,
                body: err.message,
            },
            None => BackendError::Request(err.message),
        });
    }

    if let Some(ref usage) = parsed.usage {
        log_usage(usage);
    }

    let choice = parsed.choices.and_then(|c| c.into_iter().next());
    Ok(match choice {
        Some(c) => ChatCompletion {
            content: c.message.content,
            usage: parsed.usage,
            finish_reason: c.finish_reason,
        },
        None => ChatCompletion {
            content: None,
            usage: parsed.usage,
            finish_reason: None,
        },
    })
}

fn log_usage(usage: &UsageInfo) {
    debug!(
        "Token usage: prompt={}, completion={}, total={}",
        usage.prompt_tokens.unwrap_or(0),
        usage.completion_tokens.unwrap_or(0),
        usage.total_tokens.unwrap_or(0),
    );
}

fn non_empty(content: Option<String>) -> Result<String, BackendError> {
    match content {
        Some(text) if !text.trim().is_empty() => Ok(text),
        _ => Err(BackendError::EmptyResponse),
    }
}

impl TextCompletion for OpenRouterClient {
    fn generate<'a>(
        &'a self,
        prompt: &'a str,
        max_tokens: Option<u32>,
    ) -> BackendFuture<'a, String> {
        Box::pin(async move {
            let body = self.request_for(prompt, max_tokens);
            let completion = self.chat(&body).await?;
            non_empty(completion.content)
        })
    }

    fn generate_stream<'a>(
        &'a self,
        prompt: &'a str,
        max_tokens: Option<u32>,
        on_delta: &'a mut DeltaSink<'_>,
    ) -> BackendFuture<'a, String> {
        Box::pin(async move {
            let body = self.request_for(prompt, max_tokens);
            let events = self
                .chat_stream_live(&body, |event| {
                    if let StreamEvent::TextDelta(delta) = event {
                        on_delta(delta);
                    }
                })
                .await?;
            if let Some(usage) = extract_usage(&events) {
                log_usage(&usage);
            }
            non_empty(Some(collect_text(&events)))
        })
    }

    fn max_context_length(&self) -> usize {
        self.config.max_context
    }

    fn token_count(&self, text: &str) -> usize {
        estimate_tokens(text, self.config.chars_per_token)
    }
}
