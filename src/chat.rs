//! Reply generation: role-tagged prompt assembly and the chat backend seam.
//!
//! The prompt for one turn is the shared personality as the system message,
//! the speaker's prior turns, then the new transcript. Production backend is
//! an OpenAI-compatible `/chat/completions` endpoint.

use crate::error::{AgentError, AgentResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Message role in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One role-tagged message of a prompt or a stored conversation.
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

/// Backend that turns an ordered prompt into a text reply.
#[async_trait]
pub trait ReplyBackend: Send + Sync {
    async fn generate(&self, messages: &[ChatMessage]) -> AgentResult<String>;
}

/// Production chat backend: OpenAI-compatible `/chat/completions`.
#[derive(Debug, Clone)]
pub struct OpenAiChat {
    /// Base URL without trailing slash (e.g. https://api.openai.com/v1).
    base_url: String,
    api_key: String,
    model: String,
    /// Token-budget cap sent with every request.
    max_tokens: u32,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

impl OpenAiChat {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        max_tokens: u32,
    ) -> AgentResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| AgentError::ReplyGeneration(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            max_tokens,
            client,
        })
    }
}

#[async_trait]
impl ReplyBackend for OpenAiChat {
    async fn generate(&self, messages: &[ChatMessage]) -> AgentResult<String> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": self.max_tokens,
        });
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::ReplyGeneration(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(AgentError::ReplyGeneration(format!(
                "chat API error {}: {}",
                status, body
            )));
        }
        let completion: ChatCompletion = res
            .json()
            .await
            .map_err(|e| AgentError::ReplyGeneration(e.to_string()))?;
        let reply = completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .unwrap_or_default();
        if reply.is_empty() {
            return Err(AgentError::ReplyGeneration(
                "empty completion from chat API".to_string(),
            ));
        }
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_serialize_lowercase() {
        let msg = ChatMessage::system("be brief");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "system");
        assert_eq!(json["content"], "be brief");
    }

    #[test]
    fn completion_parses_first_choice() {
        let raw = serde_json::json!({
            "choices": [
                { "message": { "role": "assistant", "content": "hi there" } }
            ]
        });
        let parsed: ChatCompletion = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed.choices[0].message.content, "hi there");
        assert_eq!(parsed.choices[0].message.role, Role::Assistant);
    }
}
