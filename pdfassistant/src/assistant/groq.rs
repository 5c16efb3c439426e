use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use super::error::AssistantError;
use super::state::ChatMessage;

const GROQ_CHAT_URL: &str = "https://api.groq.com/openai/v1/chat/completions";

/// Anything that turns a list of chat messages into a reply.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, AssistantError>;
}

pub struct GroqClient {
    api_key: Option<String>,
    model: String,
    client: Client,
}

impl GroqClient {
    /// A missing key is not an error here: Groq rejects the request and that
    /// error reaches the user as a failed agent call.
    pub fn new(api_key: Option<String>, model: impl Into<String>) -> Self {
        Self {
            api_key,
            model: model.into(),
            client: Client::new(),
        }
    }
}

#[async_trait]
impl ChatModel for GroqClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, AssistantError> {
        debug!(model = %self.model, messages = messages.len(), "sending chat completion");

        let mut request = self.client.post(GROQ_CHAT_URL).json(&json!({
            "model": self.model,
            "messages": messages,
            "temperature": 0.7,
            "max_tokens": 1024
        }));
        if let Some(api_key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", api_key));
        }

        let response = request.send().await?.error_for_status()?;
        let data = response.json::<Value>().await?;

        extract_content(&data)
    }
}

fn extract_content(data: &Value) -> Result<String, AssistantError> {
    data["choices"][0]["message"]["content"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| AssistantError::Model("Failed to get content from response".to_string()))
}
