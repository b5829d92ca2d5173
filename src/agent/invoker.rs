//! Model invocation port and the Ollama adapter.
//!
//! The iteration controller only knows the [`ModelInvoker`] trait. Retries
//! and timeouts belong to implementations of it, never to the controller.

use crate::models::TokenUsage;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Speaker of a chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// Message in the chat history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
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

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// A completed model call.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelResponse {
    pub content: String,
    pub usage: TokenUsage,
}

/// Anything that can turn a transcript into a reply.
#[async_trait]
pub trait ModelInvoker: Send + Sync {
    /// Send the ordered transcript and return the assistant reply.
    ///
    /// `token_budget` caps the length of the reply.
    async fn invoke(&self, messages: &[ChatMessage], token_budget: u32) -> Result<ModelResponse>;
}

/// Settings for the Ollama adapter.
#[derive(Debug, Clone)]
pub struct OllamaSettings {
    pub ollama_url: String,
    pub model_name: String,
    pub temperature: f32,
    pub timeout_seconds: u64,
}

impl From<&crate::config::ModelConfig> for OllamaSettings {
    fn from(config: &crate::config::ModelConfig) -> Self {
        Self {
            ollama_url: config.ollama_url.clone(),
            model_name: config.name.clone(),
            temperature: config.temperature,
            timeout_seconds: config.timeout_seconds,
        }
    }
}

/// Ollama chat API request.
#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

/// Ollama chat API response.
#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: ResponseMessage,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

/// [`ModelInvoker`] backed by a local or remote Ollama server.
pub struct OllamaInvoker {
    settings: OllamaSettings,
    http_client: reqwest::Client,
}

impl OllamaInvoker {
    pub fn new(settings: OllamaSettings) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_seconds))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            settings,
            http_client,
        })
    }

    pub fn model_name(&self) -> &str {
        &self.settings.model_name
    }
}

#[async_trait]
impl ModelInvoker for OllamaInvoker {
    async fn invoke(&self, messages: &[ChatMessage], token_budget: u32) -> Result<ModelResponse> {
        let url = format!("{}/api/chat", self.settings.ollama_url.trim_end_matches('/'));

        let request = OllamaChatRequest {
            model: &self.settings.model_name,
            messages,
            stream: false,
            options: OllamaOptions {
                temperature: self.settings.temperature,
                num_predict: token_budget,
            },
        };

        debug!("Sending chat request with {} messages", messages.len());

        let response = self
            .http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    anyhow::anyhow!(
                        "Request timed out after {}s. Try a smaller model or a longer --timeout.",
                        self.settings.timeout_seconds
                    )
                } else if e.is_connect() {
                    anyhow::anyhow!(
                        "Cannot connect to Ollama at {}. Is Ollama running?",
                        self.settings.ollama_url
                    )
                } else {
                    anyhow::anyhow!("Failed to send request: {}", e)
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("Ollama API error {}: {}", status, body));
        }

        let chat_response: OllamaChatResponse = response
            .json()
            .await
            .context("Failed to parse Ollama response")?;

        Ok(ModelResponse {
            content: chat_response.message.content,
            usage: TokenUsage::new(
                chat_response.prompt_eval_count.unwrap_or(0),
                chat_response.eval_count.unwrap_or(0),
            ),
        })
    }
}

/// In-memory invokers for tests.
#[cfg(test)]
pub mod fakes {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned replies in order and records every transcript it saw.
    ///
    /// Once the script runs out the last reply is repeated.
    #[derive(Debug, Default)]
    pub struct ScriptedInvoker {
        replies: Mutex<VecDeque<std::result::Result<String, String>>>,
        last: Mutex<Option<String>>,
        calls: Mutex<Vec<Vec<ChatMessage>>>,
        usage_per_call: TokenUsage,
        delay: Option<(Duration, usize)>,
    }

    impl ScriptedInvoker {
        pub fn new<I, S>(replies: I) -> Self
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            Self {
                replies: Mutex::new(replies.into_iter().map(|r| Ok(r.into())).collect()),
                usage_per_call: TokenUsage::new(100, 50),
                ..Self::default()
            }
        }

        /// Every call fails with `message`.
        pub fn failing(message: &str) -> Self {
            Self {
                replies: Mutex::new(VecDeque::from([Err(message.to_string())])),
                ..Self::default()
            }
        }

        /// Sleep for `delay` on every call after the first `after_calls`.
        pub fn with_delay(mut self, delay: Duration, after_calls: usize) -> Self {
            self.delay = Some((delay, after_calls));
            self
        }

        pub fn calls(&self) -> Vec<Vec<ChatMessage>> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ModelInvoker for ScriptedInvoker {
        async fn invoke(&self, messages: &[ChatMessage], _token_budget: u32) -> Result<ModelResponse> {
            let previous_calls = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(messages.to_vec());
                calls.len() - 1
            };

            if let Some((delay, after_calls)) = self.delay {
                if previous_calls >= after_calls {
                    tokio::time::sleep(delay).await;
                }
            }

            let next = self.replies.lock().unwrap().pop_front();
            let content = match next {
                Some(Ok(reply)) => {
                    *self.last.lock().unwrap() = Some(reply.clone());
                    reply
                }
                Some(Err(message)) => {
                    self.replies.lock().unwrap().push_back(Err(message.clone()));
                    return Err(anyhow::anyhow!(message));
                }
                None => self.last.lock().unwrap().clone().unwrap_or_default(),
            };

            Ok(ModelResponse {
                content,
                usage: self.usage_per_call,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_message_serialization() {
        let message = ChatMessage::assistant("hi");
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["role"], "assistant");
        assert_eq!(json["content"], "hi");
    }

    #[test]
    fn test_ollama_response_usage_is_optional() {
        let parsed: OllamaChatResponse =
            serde_json::from_str(r#"{"message":{"role":"assistant","content":"x"},"done":true}"#)
                .unwrap();
        assert_eq!(parsed.message.content, "x");
        assert!(parsed.eval_count.is_none());
    }

    #[test]
    fn test_request_carries_token_budget() {
        let messages = vec![ChatMessage::user("hello")];
        let request = OllamaChatRequest {
            model: "m",
            messages: &messages,
            stream: false,
            options: OllamaOptions {
                temperature: 0.1,
                num_predict: 512,
            },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["options"]["num_predict"], 512);
        assert_eq!(json["messages"][0]["role"], "user");
    }

    #[test]
    fn test_invoker_builds_from_config() {
        let config = crate::config::ModelConfig::default();
        let invoker = OllamaInvoker::new(OllamaSettings::from(&config)).unwrap();
        assert_eq!(invoker.model_name(), "llama3.2:latest");
    }
}
