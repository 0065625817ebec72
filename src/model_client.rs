use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use thiserror::Error;
use tokio::time::Duration;

/// Failure classes for the external decision model. The coordinator treats
/// every one of these as a recoverable per-cycle error.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication failed")]
    Auth,

    #[error("Rate limited")]
    RateLimited,

    #[error("Server error: status {0}")]
    Server(u16),

    #[error("Request timed out")]
    Timeout,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Opaque request/response seam to the external language model. The wire
/// format stays behind the implementation.
#[async_trait]
pub trait DecisionModel: Send + Sync {
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f32,
    ) -> Result<String, ModelError>;
}

// ─── HTTP client ─────────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub struct ModelClientConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for ModelClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080/v1/chat/completions".to_string(),
            api_key: String::new(),
            model: "local".to_string(),
            timeout_secs: 20,
        }
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

/// Reference chat-completions transport over HTTP.
pub struct HttpModelClient {
    config: ModelClientConfig,
    client: reqwest::Client,
}

impl HttpModelClient {
    pub fn new(config: ModelClientConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        Self { config, client }
    }
}

#[async_trait]
impl DecisionModel for HttpModelClient {
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f32,
    ) -> Result<String, ModelError> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
            temperature,
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ModelError::Timeout
                } else {
                    ModelError::Network(e.to_string())
                }
            })?;

        match response.status().as_u16() {
            200 => {}
            401 | 403 => return Err(ModelError::Auth),
            429 => return Err(ModelError::RateLimited),
            status if status >= 500 => return Err(ModelError::Server(status)),
            status => return Err(ModelError::Server(status)),
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ModelError::InvalidResponse(e.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ModelError::InvalidResponse("empty choices".to_string()))
    }
}

// ─── Scripted model (tests + demo) ───────────────────────────────────────────

/// Returns queued responses in order, then repeats the last one. An entry
/// of `Err` simulates a transport failure.
pub struct ScriptedModel {
    responses: Mutex<Vec<Result<String, ModelError>>>,
    calls: Mutex<u64>,
}

impl ScriptedModel {
    pub fn new(responses: Vec<Result<String, ModelError>>) -> Self {
        Self {
            responses: Mutex::new(responses),
            calls: Mutex::new(0),
        }
    }

    pub fn always(response: impl Into<String>) -> Self {
        Self::new(vec![Ok(response.into())])
    }

    pub fn call_count(&self) -> u64 {
        *self.calls.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl DecisionModel for ScriptedModel {
    async fn complete(
        &self,
        _system_prompt: &str,
        _user_prompt: &str,
        _temperature: f32,
    ) -> Result<String, ModelError> {
        *self.calls.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        let mut responses = self.responses.lock().unwrap_or_else(|e| e.into_inner());
        let next = if responses.len() > 1 {
            responses.remove(0)
        } else {
            match responses.first() {
                Some(Ok(text)) => Ok(text.clone()),
                Some(Err(_)) | None => Err(ModelError::Network("script exhausted".to_string())),
            }
        };
        next
    }
}
