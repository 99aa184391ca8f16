use async_trait::async_trait;
use codeframe_core::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;

/// Role of a chat message sent to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One message in an LLM conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// The provider boundary: `complete(messages, model) -> text`.
///
/// SDK concerns (streaming, tool use, retries beyond a call) stay outside
/// the core; workers only need a completion.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage], model: &str) -> CoreResult<String>;
}

/// Which wire protocol the HTTP client speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    Claude,
    OpenAi,
}

/// Plain HTTP client for Claude and OpenAI-style completion APIs.
pub struct HttpLlmClient {
    provider: LlmProvider,
    base_url: String,
    api_key: String,
    max_tokens: u32,
    http: reqwest::Client,
}

impl HttpLlmClient {
    pub fn new(provider: LlmProvider, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            provider,
            base_url: base_url.into(),
            api_key: api_key.into(),
            max_tokens: 8192,
            http: reqwest::Client::new(),
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    async fn complete_claude(&self, messages: &[ChatMessage], model: &str) -> CoreResult<String> {
        let url = format!("{}/v1/messages", self.base_url);

        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == ChatRole::System)
            .map(|m| m.content.as_str())
            .collect();
        let api_messages: Vec<serde_json::Value> = messages
            .iter()
            .filter(|m| m.role != ChatRole::System)
            .map(|m| {
                serde_json::json!({
                    "role": match m.role {
                        ChatRole::User => "user",
                        ChatRole::Assistant => "assistant",
                        ChatRole::System => unreachable!(),
                    },
                    "content": m.content,
                })
            })
            .collect();

        let mut body = serde_json::json!({
            "model": model,
            "max_tokens": self.max_tokens,
            "messages": api_messages,
        });
        if !system.is_empty() {
            body["system"] = serde_json::json!(system.join("\n\n"));
        }

        let resp = self
            .http
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::ExternalTool(format!("LLM request failed: {e}")))?;

        let status = resp.status();
        let resp_body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| CoreError::ExternalTool(format!("LLM response unreadable: {e}")))?;
        if !status.is_success() {
            return Err(CoreError::ExternalTool(format!(
                "Claude API error {status}: {resp_body}"
            )));
        }

        let text: String = resp_body["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(|b| b["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default();
        Ok(text)
    }

    async fn complete_openai(&self, messages: &[ChatMessage], model: &str) -> CoreResult<String> {
        let url = format!("{}/v1/chat/completions", self.base_url);

        let api_messages: Vec<serde_json::Value> = messages
            .iter()
            .map(|m| {
                serde_json::json!({
                    "role": match m.role {
                        ChatRole::System => "system",
                        ChatRole::User => "user",
                        ChatRole::Assistant => "assistant",
                    },
                    "content": m.content,
                })
            })
            .collect();

        let body = serde_json::json!({
            "model": model,
            "max_tokens": self.max_tokens,
            "messages": api_messages,
        });

        let resp = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::ExternalTool(format!("LLM request failed: {e}")))?;

        let status = resp.status();
        let resp_body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| CoreError::ExternalTool(format!("LLM response unreadable: {e}")))?;
        if !status.is_success() {
            return Err(CoreError::ExternalTool(format!(
                "OpenAI API error {status}: {resp_body}"
            )));
        }

        Ok(resp_body["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string())
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(&self, messages: &[ChatMessage], model: &str) -> CoreResult<String> {
        info!(model, messages = messages.len(), "LLM completion");
        match self.provider {
            LlmProvider::Claude => self.complete_claude(messages, model).await,
            LlmProvider::OpenAi => self.complete_openai(messages, model).await,
        }
    }
}

/// Scripted LLM for tests: pops responses in order, repeating the last one
/// once the script runs dry.
pub struct MockLlmClient {
    responses: Mutex<Vec<String>>,
    last: Mutex<Option<String>>,
}

impl MockLlmClient {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses: Mutex::new(responses),
            last: Mutex::new(None),
        }
    }

    pub fn always(response: impl Into<String>) -> Self {
        let response = response.into();
        Self {
            responses: Mutex::new(vec![]),
            last: Mutex::new(Some(response)),
        }
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, _messages: &[ChatMessage], _model: &str) -> CoreResult<String> {
        let mut responses = self.responses.lock().await;
        if responses.is_empty() {
            let last = self.last.lock().await;
            return last
                .clone()
                .ok_or_else(|| CoreError::ExternalTool("mock LLM script exhausted".into()));
        }
        let next = responses.remove(0);
        *self.last.lock().await = Some(next.clone());
        Ok(next)
    }
}
