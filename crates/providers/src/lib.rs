//! Provider abstractions for chat-completion, embedding, and vector-search services.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

pub mod noop;
pub mod openai;
pub mod qdrant;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("not implemented")]
    NotImplemented,
    #[error("request failed: {0}")]
    RequestFailed(String),
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
}

/// Fire-and-forget channel for incremental token delivery. Send failures
/// (subscriber gone) are ignored by implementations.
pub type TokenSink = tokio::sync::mpsc::UnboundedSender<String>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedResponse {
    pub vectors: Vec<Vec<f32>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// A callable capability advertised to the chat service, in JSON-schema form.
#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// A capability the chat service chose to invoke. `arguments` is the raw
/// JSON payload; callers parse it against the schema they declared.
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub name: String,
    pub arguments: String,
}

#[derive(Clone, Default)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSpec>,
    /// `None` leaves sampling at the service default.
    pub temperature: Option<f32>,
    /// When set, providers that support streaming push partial output here
    /// in generation order, in addition to returning the full content.
    pub stream_to: Option<TokenSink>,
}

#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    /// Set when the service declined to respond (safety policy).
    pub refusal: Option<String>,
}

#[async_trait::async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<EmbedResponse, ProviderError>;

    /// Single-query convenience used on every retrieval path.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let resp = self.embed(&[text.to_string()]).await?;
        resp.vectors
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::RequestFailed("empty embedding response".into()))
    }
}

#[async_trait::async_trait]
pub trait ChatProvider: Send + Sync {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError>;
}

#[derive(Default, Clone)]
pub struct ProviderRegistry {
    embeddings: HashMap<String, Arc<dyn EmbeddingProvider>>,
    chats: HashMap<String, Arc<dyn ChatProvider>>,
    pub preferred_embedding: Option<String>,
    pub preferred_chat: Option<String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_embedding(mut self, name: &str, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embeddings.insert(name.to_string(), provider);
        self
    }

    pub fn with_chat(mut self, name: &str, provider: Arc<dyn ChatProvider>) -> Self {
        self.chats.insert(name.to_string(), provider);
        self
    }

    pub fn set_preferred_embedding(mut self, name: &str) -> Self {
        self.preferred_embedding = Some(name.to_string());
        self
    }

    pub fn set_preferred_chat(mut self, name: &str) -> Self {
        self.preferred_chat = Some(name.to_string());
        self
    }

    pub fn embedding(
        &self,
        name: Option<&str>,
    ) -> Result<Arc<dyn EmbeddingProvider>, ProviderError> {
        let key = name
            .map(str::to_string)
            .or_else(|| self.preferred_embedding.clone())
            .ok_or_else(|| {
                ProviderError::UnknownProvider("no embedding provider configured".into())
            })?;
        self.embeddings
            .get(&key)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownProvider(key))
    }

    pub fn chat(&self, name: Option<&str>) -> Result<Arc<dyn ChatProvider>, ProviderError> {
        let key = name
            .map(str::to_string)
            .or_else(|| self.preferred_chat.clone())
            .ok_or_else(|| ProviderError::UnknownProvider("no chat provider configured".into()))?;
        self.chats
            .get(&key)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownProvider(key))
    }
}
