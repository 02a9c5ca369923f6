use anyhow::{Context, Result};
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

// Fixed sampling parameters: stylistic variability without determinism.
const COMPLETION_TEMPERATURE: f32 = 0.7;
const COMPLETION_MAX_TOKENS: u32 = 500;

/// User-safe stand-in for any completion failure. The session layer emits
/// this verbatim and keeps the chat alive.
pub const FALLBACK_REPLY: &str = "⚠️ Failed to generate a reply. Please try again later.";

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("completion request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("completion endpoint returned status {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("completion response carries no assistant content")]
    MissingContent,
}

/// One persona-conditioned completion turn. Implemented by the HTTP client
/// below and by scripted backends in tests.
pub trait CompletionBackend: Send + Sync {
    fn complete(
        &self,
        style_prompt: &str,
        user_turn: &str,
    ) -> impl Future<Output = Result<String, CompletionError>> + Send;
}

pub struct CompletionClient {
    endpoint: Url,
    api_key: String,
    model: String,
    http: Client,
}

impl CompletionClient {
    pub fn new(base_url: &str, api_key: &str, model: &str, timeout: Duration) -> Result<Self> {
        let trimmed = base_url.trim().trim_end_matches('/');
        let endpoint = Url::parse(&format!("{trimmed}/chat/completions"))
            .context("openai.api_url must be a valid URL string")?;
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client for the completion endpoint")?;

        debug!(
            endpoint = %endpoint,
            timeout_seconds = timeout.as_secs(),
            "built completion HTTP client"
        );

        Ok(Self {
            endpoint,
            api_key: api_key.trim().to_owned(),
            model: model.trim().to_owned(),
            http,
        })
    }
}

impl CompletionBackend for CompletionClient {
    async fn complete(
        &self,
        style_prompt: &str,
        user_turn: &str,
    ) -> Result<String, CompletionError> {
        let request = build_completion_request(&self.model, style_prompt, user_turn);

        debug!(model = %self.model, "sending completion request");

        let response = self
            .http
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionError::Status { status, body });
        }

        let parsed: ChatResponse = response.json().await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content)
            .ok_or(CompletionError::MissingContent)?;

        Ok(content.trim().to_owned())
    }
}

fn build_completion_request(model: &str, style_prompt: &str, user_turn: &str) -> ChatRequest {
    // Only the persona prompt and the latest turn go to the model; the
    // session's turn history is bookkeeping, not request payload.
    ChatRequest {
        model: model.to_owned(),
        messages: vec![
            ChatMessage {
                role: "system".to_owned(),
                content: style_prompt.to_owned(),
            },
            ChatMessage {
                role: "user".to_owned(),
                content: user_turn.to_owned(),
            },
        ],
        temperature: COMPLETION_TEMPERATURE,
        max_tokens: COMPLETION_MAX_TOKENS,
        stream: false,
    }
}

#[derive(Debug, PartialEq, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: Option<AssistantMessage>,
}

#[derive(Deserialize)]
struct AssistantMessage {
    content: Option<String>,
}
