use crate::error::ChatError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_CHAT_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const DEFAULT_CHAT_MODEL: &str = "llama3-8b-8192";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChatPrompt {
    pub messages: Vec<ChatMessage>,
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;

    async fn complete(&self, prompt: &ChatPrompt) -> Result<String, ChatError>;
}

#[derive(Debug, Clone)]
pub struct ChatEndpointConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: Option<f32>,
    pub timeout: Duration,
}

impl ChatEndpointConfig {
    pub fn groq(api_key: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_CHAT_BASE_URL.to_string(),
            api_key: api_key.into(),
            model: DEFAULT_CHAT_MODEL.to_string(),
            temperature: None,
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Client for any `/chat/completions` endpoint speaking the OpenAI wire format
/// (Groq, OpenAI, Ollama, vLLM).
pub struct OpenAiCompatibleChat {
    config: ChatEndpointConfig,
    client: Client,
}

impl OpenAiCompatibleChat {
    pub fn new(config: ChatEndpointConfig) -> Result<Self, ChatError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl ChatModel for OpenAiCompatibleChat {
    fn model_name(&self) -> &str {
        &self.config.model
    }

    async fn complete(&self, prompt: &ChatPrompt) -> Result<String, ChatError> {
        let body = CompletionRequest {
            model: &self.config.model,
            messages: &prompt.messages,
            temperature: self.config.temperature,
            stream: false,
        };

        let mut request = self
            .client
            .post(format!(
                "{}/chat/completions",
                self.config.base_url.trim_end_matches('/')
            ))
            .json(&body);

        if !self.config.api_key.is_empty() {
            request = request.bearer_auth(&self.config.api_key);
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(ChatError::Api { status, message });
        }

        let payload: CompletionResponse = response.json().await?;
        first_choice_content(payload)
    }
}

fn first_choice_content(payload: CompletionResponse) -> Result<String, ChatError> {
    payload
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| ChatError::Parse("completion has no message content".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_uses_openai_wire_format() {
        let messages = vec![ChatMessage::system("be brief"), ChatMessage::user("hi")];
        let body = CompletionRequest {
            model: DEFAULT_CHAT_MODEL,
            messages: &messages,
            temperature: None,
            stream: false,
        };

        let value = serde_json::to_value(&body).expect("request should serialize");
        assert_eq!(
            value,
            json!({
                "model": "llama3-8b-8192",
                "messages": [
                    { "role": "system", "content": "be brief" },
                    { "role": "user", "content": "hi" }
                ],
                "stream": false
            })
        );
    }

    #[test]
    fn first_choice_is_returned() {
        let payload: CompletionResponse = serde_json::from_value(json!({
            "id": "chatcmpl-1",
            "choices": [
                { "index": 0, "message": { "role": "assistant", "content": "The total is $42.00." } }
            ]
        }))
        .expect("payload should deserialize");

        assert_eq!(
            first_choice_content(payload).expect("content should exist"),
            "The total is $42.00."
        );
    }

    #[test]
    fn missing_choices_are_a_parse_error() {
        let payload: CompletionResponse =
            serde_json::from_value(json!({ "choices": [] })).expect("payload should deserialize");
        assert!(matches!(
            first_choice_content(payload),
            Err(ChatError::Parse(_))
        ));
    }

    fn endpoint(base_url: String) -> ChatEndpointConfig {
        ChatEndpointConfig {
            base_url,
            timeout: Duration::from_secs(5),
            ..ChatEndpointConfig::groq("test-key")
        }
    }

    #[tokio::test]
    async fn rate_limited_completion_is_an_api_error() {
        use axum::{http::StatusCode, routing::post, Router};

        let router = Router::new().route(
            "/chat/completions",
            post(|| async { (StatusCode::TOO_MANY_REQUESTS, "rate limit reached") }),
        );
        let base_url = crate::test_support::serve(router).await;
        let chat = OpenAiCompatibleChat::new(endpoint(base_url)).expect("client should build");

        let prompt = ChatPrompt {
            messages: vec![ChatMessage::user("hi")],
        };
        match chat.complete(&prompt).await {
            Err(ChatError::Api { status, message }) => {
                assert_eq!(status, 429);
                assert_eq!(message, "rate limit reached");
            }
            other => panic!("expected an api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn completion_is_read_from_a_live_endpoint() {
        use axum::{http::HeaderMap, routing::post, Json, Router};

        let router = Router::new().route(
            "/chat/completions",
            post(|headers: HeaderMap| async move {
                let authorized = headers
                    .get("authorization")
                    .and_then(|value| value.to_str().ok())
                    == Some("Bearer test-key");
                let content = if authorized { "The total is $42.00." } else { "unauthorized" };
                Json(json!({ "choices": [{ "message": { "role": "assistant", "content": content } }] }))
            }),
        );
        let base_url = crate::test_support::serve(router).await;
        let chat = OpenAiCompatibleChat::new(endpoint(format!("{base_url}/")))
            .expect("client should build");

        let prompt = ChatPrompt {
            messages: vec![ChatMessage::user("What is the total?")],
        };
        let reply = chat.complete(&prompt).await.expect("completion should succeed");
        assert_eq!(reply, "The total is $42.00.");
    }
}
