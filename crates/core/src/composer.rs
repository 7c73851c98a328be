//! Composes the final grounded answer and persists the exchange to the
//! conversation memory store.

use crate::models::{RetrievedDocument, Turn};
use anyhow::Context;
use providers::{ChatMessage, ChatProvider, ChatRequest, TokenSink};
use sqlx::SqlitePool;

const SEPARATOR: &str = "\n\n---\n\n";

const SYSTEM_TEMPLATE: &str = "You are a helpful assistant. Answer the user's question \
using the retrieved context below. If the context does not contain the answer, say \
so rather than guessing.\n\nContext:\n";

#[derive(Debug, Clone)]
pub struct AnswerResult {
    pub answer: String,
    /// Exactly the documents supplied as grounding, in the order supplied.
    pub sources: Vec<RetrievedDocument>,
}

/// One answer-generation call over the grounding documents and memory
/// history, then an append of (user query, answer) to the store. The sink,
/// when attached, receives partial output as the provider produces it; the
/// returned result is identical either way.
pub async fn compose(
    chat: &dyn ChatProvider,
    pool: &SqlitePool,
    conversation_id: Option<&str>,
    query: &str,
    docs: Vec<RetrievedDocument>,
    history: &[Turn],
    stream_to: Option<TokenSink>,
) -> anyhow::Result<AnswerResult> {
    let context = docs
        .iter()
        .map(|d| d.content.as_str())
        .collect::<Vec<_>>()
        .join(SEPARATOR);

    let mut messages = vec![ChatMessage::system(format!("{}{}", SYSTEM_TEMPLATE, context))];
    for turn in history {
        messages.push(ChatMessage {
            role: turn.role.as_chat_role().to_string(),
            content: turn.content.clone(),
        });
    }
    messages.push(ChatMessage::user(query));

    let resp = chat
        .chat(ChatRequest {
            messages,
            tools: Vec::new(),
            temperature: None,
            stream_to,
        })
        .await
        .context("answer generation")?;

    let answer = resp
        .content
        .filter(|c| !c.is_empty())
        .context("answer generation returned no content")?;

    if let Some(id) = conversation_id {
        storage::append_messages(pool, id, &[("human", query), ("ai", &answer)])
            .await
            .context("persist exchange")?;
    }

    Ok(AnswerResult {
        answer,
        sources: docs,
    })
}
