//! Storage layer: SQLite pool setup, migrations, the append-only
//! conversation message store, and the location-table fetch used when
//! building the structured retriever.

use anyhow::Context;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};

pub mod models;

use models::{LocationRow, StoredMessage};

pub async fn connect(database_url: &str) -> anyhow::Result<SqlitePool> {
    let mut url = database_url.to_string();
    if !database_url.starts_with("sqlite:") {
        let path = std::path::PathBuf::from(database_url);
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let norm = path.to_string_lossy().replace('\\', "/");
        if path.is_absolute() {
            url = format!("sqlite:///{}", norm.trim_start_matches('/'));
        } else {
            url = format!("sqlite://{}", norm);
        }
    }
    let mut opts = SqlitePoolOptions::new();
    if url.contains("memory") {
        opts = opts.max_connections(1);
    } else {
        opts = opts.max_connections(5);
    }
    let pool = opts.connect(&url).await?;
    Ok(pool)
}

pub async fn migrate(pool: &SqlitePool) -> anyhow::Result<()> {
    // Applies SQLx migrations located in crates/storage/migrations.
    // Safe to run multiple times (idempotent).
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// All persisted messages for a conversation, in insertion order.
/// An unknown session id yields an empty vec.
pub async fn fetch_messages(
    pool: &SqlitePool,
    session_id: &str,
) -> anyhow::Result<Vec<StoredMessage>> {
    let rows = sqlx::query(
        "SELECT id, role, content FROM messages WHERE session_id = ? ORDER BY id ASC",
    )
    .bind(session_id)
    .fetch_all(pool)
    .await?;

    let mut messages = Vec::with_capacity(rows.len());
    for row in rows {
        messages.push(StoredMessage {
            id: row.try_get("id")?,
            role: row.try_get("role")?,
            content: row.try_get("content")?,
        });
    }
    Ok(messages)
}

/// Append messages for a conversation in the given order. Inserts run inside
/// one transaction so a conversation never gains a partial exchange.
pub async fn append_messages(
    pool: &SqlitePool,
    session_id: &str,
    entries: &[(&str, &str)],
) -> anyhow::Result<()> {
    let mut tx = pool.begin().await?;
    for (role, content) in entries {
        sqlx::query("INSERT INTO messages (session_id, role, content) VALUES (?, ?, ?)")
            .bind(session_id)
            .bind(role)
            .bind(content)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(())
}

/// Read every row of `table`, selecting `columns` in order (cast to text)
/// plus the embedding column. Rows come back in table order; the embedding
/// is parsed from its JSON array encoding here so a corrupt row fails the
/// fetch instead of surfacing as a bad similarity score later.
pub async fn fetch_location_rows(
    pool: &SqlitePool,
    table: &str,
    columns: &[&str],
    embedding_column: &str,
) -> anyhow::Result<Vec<LocationRow>> {
    let selected = columns
        .iter()
        .map(|c| format!("CAST({} AS TEXT)", c))
        .collect::<Vec<_>>()
        .join(", ");
    let query = format!(
        "SELECT {}, {} FROM {} ORDER BY rowid ASC",
        selected, embedding_column, table
    );

    let rows = sqlx::query(&query).fetch_all(pool).await?;
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let mut fields = Vec::with_capacity(columns.len());
        for i in 0..columns.len() {
            let value: Option<String> = row.try_get(i)?;
            fields.push(value.unwrap_or_default());
        }
        let raw: Option<String> = row.try_get(columns.len())?;
        let raw = raw.with_context(|| format!("row in {} has no embedding", table))?;
        let embedding: Vec<f32> = serde_json::from_str(&raw)
            .with_context(|| format!("malformed embedding in {}", table))?;
        out.push(LocationRow { fields, embedding });
    }
    Ok(out)
}
