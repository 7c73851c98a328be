//! Decides whether retrieved documents suffice to answer a query.

use crate::models::RetrievedDocument;
use providers::{ChatMessage, ChatProvider, ChatRequest};
use tracing::warn;

const SEPARATOR: &str = "\n\n---\n\n";

/// Stands in for the context block when nothing was retrieved, so the
/// judge can tell "no context" apart from "empty context".
const EMPTY_SENTINEL: &str = "[empty]";

const SYSTEM_INSTRUCTION: &str = "You are a careful judge. Determine if the provided \
context is enough to confidently and accurately answer the question. Respond ONLY \
with JSON: {\"sufficient\": true|false}";

/// `true` when the context is judged sufficient. Every failure mode —
/// transport error, malformed reply, missing field — degrades to `false`,
/// favoring more context over an under-grounded answer.
pub async fn judge(chat: &dyn ChatProvider, query: &str, docs: &[RetrievedDocument]) -> bool {
    let combined = docs
        .iter()
        .map(|d| d.content.trim())
        .filter(|c| !c.is_empty())
        .collect::<Vec<_>>()
        .join(SEPARATOR);
    let context = if combined.is_empty() {
        EMPTY_SENTINEL
    } else {
        combined.as_str()
    };

    let req = ChatRequest {
        messages: vec![
            ChatMessage::system(SYSTEM_INSTRUCTION),
            ChatMessage::user(format!("Question:\n{}\n\nContext:\n{}", query, context)),
        ],
        tools: Vec::new(),
        temperature: Some(0.0),
        stream_to: None,
    };

    match chat.chat(req).await {
        Ok(resp) => parse_verdict(resp.content.as_deref().unwrap_or("{}")),
        Err(e) => {
            warn!(error = %e, "sufficiency judge call failed, treating as insufficient");
            false
        }
    }
}

pub(crate) fn parse_verdict(content: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(content)
        .ok()
        .and_then(|v| v.get("sufficient").and_then(|s| s.as_bool()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_formed_verdicts() {
        assert!(parse_verdict(r#"{"sufficient": true}"#));
        assert!(!parse_verdict(r#"{"sufficient": false}"#));
    }

    #[test]
    fn malformed_input_defaults_to_insufficient() {
        assert!(!parse_verdict("not json"));
        assert!(!parse_verdict("{}"));
        assert!(!parse_verdict(r#"{"sufficient": "yes"}"#));
        assert!(!parse_verdict(r#"{"verdict": true}"#));
        assert!(!parse_verdict(""));
    }
}
