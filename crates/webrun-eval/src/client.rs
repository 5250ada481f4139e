//! Chat-completions client for the judge model.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::EvalError;

/// Default OpenAI-compatible endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Default judge model.
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// Completion budget for one verdict.
pub const MAX_TOKENS: u32 = 1000;

/// A chat-completions request body.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: "system",
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user(parts: Vec<ContentPart>) -> Self {
        Self {
            role: "user",
            content: MessageContent::Parts(parts),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn image(url: impl Into<String>) -> Self {
        Self::ImageUrl {
            image_url: ImageUrl { url: url.into() },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Something that can answer a judge request with text.
#[async_trait]
pub trait Judge: Send + Sync {
    async fn judge(&self, request: &ChatRequest) -> Result<String, EvalError>;
}

#[async_trait]
impl<T: Judge + ?Sized> Judge for std::sync::Arc<T> {
    async fn judge(&self, request: &ChatRequest) -> Result<String, EvalError> {
        (**self).judge(request).await
    }
}

/// HTTP judge backed by an OpenAI-compatible endpoint.
pub struct JudgeClient {
    inner: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_attempts: u32,
    rate_limit_backoff: Duration,
    server_error_backoff: Duration,
}

impl JudgeClient {
    pub fn new(base_url: &str, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            inner: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            max_attempts: 3,
            rate_limit_backoff: Duration::from_secs(10),
            server_error_backoff: Duration::from_secs(15),
        }
    }

    /// Builder method to change the retry delays.
    pub fn with_backoff(mut self, rate_limit: Duration, server_error: Duration) -> Self {
        self.rate_limit_backoff = rate_limit;
        self.server_error_backoff = server_error;
        self
    }

    /// Builder method to change the attempt limit (at least one).
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn backoff_for(&self, status: StatusCode) -> Option<Duration> {
        if status == StatusCode::TOO_MANY_REQUESTS {
            Some(self.rate_limit_backoff)
        } else if status.is_server_error() {
            Some(self.server_error_backoff)
        } else {
            None
        }
    }
}

#[async_trait]
impl Judge for JudgeClient {
    async fn judge(&self, request: &ChatRequest) -> Result<String, EvalError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!(url = %url, attempt, "POST request");

            let response = self
                .inner
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(request)
                .send()
                .await?;

            let status = response.status();
            if status.is_success() {
                let body: ChatResponse = response.json().await?;
                return body
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.message.content)
                    .ok_or(EvalError::EmptyResponse);
            }

            let body = response.text().await.unwrap_or_default();
            match self.backoff_for(status) {
                Some(delay) if attempt < self.max_attempts => {
                    warn!(
                        status = status.as_u16(),
                        attempt,
                        delay_secs = delay.as_secs(),
                        "Judge request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                _ => {
                    return Err(EvalError::Api {
                        status: status.as_u16(),
                        body,
                    })
                }
            }
        }
    }
}
