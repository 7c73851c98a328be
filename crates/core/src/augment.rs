//! Best-effort external knowledge fetch for queries the knowledge base
//! cannot cover on its own.

use crate::models::RetrievedDocument;
use providers::{ChatMessage, ChatProvider, ChatRequest};
use tracing::debug;

pub const EXTERNAL_SOURCE: &str = "external_context";

const SYSTEM_INSTRUCTION: &str = "You are an information-gathering assistant. Given a \
user's question, provide concise additional context or key facts from general \
knowledge that could help answer the question more completely. Do NOT write the \
final answer - just provide extra factual context as bullet points or short \
paragraphs.";

/// Outcome of an augmentation attempt. Failures are typed, not thrown:
/// augmentation must never abort the pipeline.
#[derive(Debug)]
pub enum Augmentation {
    Snippet(RetrievedDocument),
    Unavailable,
}

/// Asks the chat service for supplementary factual context. Low non-zero
/// temperature: some generative variety is fine here since this is not the
/// final answer. Any failure or empty reply is `Unavailable`.
pub async fn fetch_external_context(
    chat: &dyn ChatProvider,
    conversation_id: Option<&str>,
    query: &str,
) -> Augmentation {
    let req = ChatRequest {
        messages: vec![
            ChatMessage::system(SYSTEM_INSTRUCTION),
            ChatMessage::user(format!(
                "conversation_id: {}\nQuestion: {}\n\n",
                conversation_id.unwrap_or("new"),
                query
            )),
        ],
        tools: Vec::new(),
        temperature: Some(0.2),
        stream_to: None,
    };

    let text = match chat.chat(req).await {
        Ok(resp) => resp.content.unwrap_or_default(),
        Err(e) => {
            debug!(error = %e, "external context fetch failed");
            return Augmentation::Unavailable;
        }
    };

    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Augmentation::Unavailable;
    }

    Augmentation::Snippet(RetrievedDocument::new(
        format!("[EXTERNAL CONTEXT]\n{}", trimmed),
        EXTERNAL_SOURCE,
    ))
}
