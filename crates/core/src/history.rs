//! Rebuilds a conversation's prior turns from the message store.

use crate::models::{Role, Turn};
use anyhow::bail;
use sqlx::SqlitePool;

/// All persisted turns for a conversation, in insertion order. An unknown
/// id yields an empty sequence. An unrecognized role label is a hard error:
/// silently defaulting it would corrupt every prompt built from this
/// history.
pub async fn reconstruct(pool: &SqlitePool, conversation_id: &str) -> anyhow::Result<Vec<Turn>> {
    let messages = storage::fetch_messages(pool, conversation_id).await?;
    let mut turns = Vec::with_capacity(messages.len());
    for message in messages {
        let role = match message.role.as_str() {
            "human" => Role::User,
            "ai" => Role::Assistant,
            other => bail!(
                "unrecognized role label {:?} in conversation {}",
                other,
                conversation_id
            ),
        };
        turns.push(Turn {
            role,
            content: message.content,
        });
    }
    Ok(turns)
}
