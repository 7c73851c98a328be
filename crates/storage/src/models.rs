use serde::{Deserialize, Serialize};

/// One persisted conversation turn as the store records it. `role` uses the
/// store's own vocabulary (`human` / `ai`); mapping to prompt roles happens
/// in the core crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: i64,
    pub role: String,
    pub content: String,
}

/// One location-table row: column values in the same order as the column
/// list given to the fetch, plus the row's precomputed embedding.
#[derive(Debug, Clone)]
pub struct LocationRow {
    pub fields: Vec<String>,
    pub embedding: Vec<f32>,
}
