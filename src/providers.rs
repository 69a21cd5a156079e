//! Completion endpoint client.
//!
//! Speaks the OpenAI-compatible chat completions protocol: a POST of
//! `{model, messages, temperature, max_tokens}` answered by
//! `{"choices": [{"message": {"content": ...}}]}`. Only HTTP 200 with that
//! content path counts as success.

use crate::config::ResolvedProfile;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Timeout used by the connectivity check
pub const PING_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors talking to the completion endpoint
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EndpointError {
    #[error("Endpoint returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

/// Speaker of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// OpenAI-compatible chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// OpenAI-compatible chat completion request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub max_tokens: u32,
}

/// Something that can turn a message sequence into a reply
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Profile the backend sends requests with
    fn profile(&self) -> &ResolvedProfile;

    async fn complete(&self, messages: Vec<ChatMessage>) -> Result<String, EndpointError>;

    /// Minimal request to confirm the endpoint answers
    async fn ping(&self) -> Result<(), EndpointError>;
}

/// reqwest-backed client for one endpoint profile
#[derive(Debug, Clone)]
pub struct CompletionClient {
    http: Client,
    profile: ResolvedProfile,
}

impl CompletionClient {
    pub fn new(profile: ResolvedProfile) -> Self {
        Self {
            http: Client::new(),
            profile,
        }
    }

    fn request_body(&self, messages: Vec<ChatMessage>, max_tokens: u32) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: self.profile.model.clone(),
            messages,
            temperature: self.profile.temperature,
            max_tokens,
        }
    }

    async fn send(
        &self,
        body: &ChatCompletionRequest,
        timeout: Duration,
    ) -> Result<Value, EndpointError> {
        debug!(
            endpoint = %self.profile.endpoint,
            messages = body.messages.len(),
            "Sending completion request"
        );

        let mut request = self
            .http
            .post(&self.profile.endpoint)
            .timeout(timeout)
            .json(body);
        if let Some(key) = &self.profile.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| classify_transport_error(e, timeout))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "Endpoint returned non-200 status");
            return Err(EndpointError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| EndpointError::MalformedResponse(e.to_string()))
    }
}

fn classify_transport_error(err: reqwest::Error, timeout: Duration) -> EndpointError {
    if err.is_timeout() {
        EndpointError::Timeout(timeout.as_secs())
    } else {
        EndpointError::Connection(err.to_string())
    }
}

/// `choices[0].message.content` of a completion response
pub fn extract_response_text(response: &Value) -> Result<String, EndpointError> {
    response
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| {
            EndpointError::MalformedResponse("missing choices[0].message.content".to_string())
        })
}

#[async_trait]
impl CompletionBackend for CompletionClient {
    fn profile(&self) -> &ResolvedProfile {
        &self.profile
    }

    async fn complete(&self, messages: Vec<ChatMessage>) -> Result<String, EndpointError> {
        let body = self.request_body(messages, self.profile.max_tokens);
        let response = self.send(&body, self.profile.timeout).await?;
        extract_response_text(&response)
    }

    async fn ping(&self) -> Result<(), EndpointError> {
        let body = self.request_body(vec![ChatMessage::user("Hi")], 1);
        self.send(&body, PING_TIMEOUT).await.map(|_| ())
    }
}
