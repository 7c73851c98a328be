use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One conversation turn in prompt vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_chat_role(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

/// A ranked candidate document produced by a retriever. For the structured
/// location path, `content` is a JSON-serialized record. `metadata` always
/// carries a `source` tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedDocument {
    pub content: String,
    pub metadata: HashMap<String, serde_json::Value>,
    pub score: Option<f32>,
}

impl RetrievedDocument {
    pub fn new(content: impl Into<String>, source: &str) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert(
            "source".to_string(),
            serde_json::Value::String(source.to_string()),
        );
        Self {
            content: content.into(),
            metadata,
            score: None,
        }
    }

    pub fn source(&self) -> Option<&str> {
        self.metadata.get("source").and_then(|v| v.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    Direct,
    Location,
}

/// The result envelope handed to the transport layer. Field names match
/// what the frontend consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    #[serde(rename = "userQuery")]
    pub user_query: String,
    pub response: String,
    pub response_type: ResponseType,
    pub locations: Vec<serde_json::Value>,
    #[serde(rename = "dateCreated")]
    pub date_created: i64,
    #[serde(rename = "conversationId")]
    pub conversation_id: Option<String>,
}
