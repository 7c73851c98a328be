//! Orchestrates one query end to end: reconstruct history, classify,
//! retrieve, judge, optionally augment, compose.

use crate::augment::{self, Augmentation};
use crate::classifier::{self, Decision, SearchKind};
use crate::composer;
use crate::config::AppConfig;
use crate::error::PipelineError;
use crate::history;
use crate::judge;
use crate::locations::TableColumnRetriever;
use crate::models::{ResponseType, SearchResponse};
use crate::retriever::{Retriever, VectorRetriever};
use anyhow::Context;
use providers::noop::NoopProvider;
use providers::openai::{OpenAiConfig, OpenAiProvider};
use providers::qdrant::{QdrantClient, QdrantConfig};
use providers::{ChatProvider, ProviderRegistry, TokenSink};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{debug, info};

/// One pipeline instance per process is fine for concurrent conversations:
/// all handles are shared immutable state, and the message store serializes
/// appends per conversation.
pub struct SearchPipeline {
    chat: Arc<dyn ChatProvider>,
    direct: Arc<dyn Retriever>,
    location: Arc<dyn Retriever>,
    pool: SqlitePool,
}

impl SearchPipeline {
    pub fn new(
        chat: Arc<dyn ChatProvider>,
        direct: Arc<dyn Retriever>,
        location: Arc<dyn Retriever>,
        pool: SqlitePool,
    ) -> Self {
        Self {
            chat,
            direct,
            location,
            pool,
        }
    }

    /// Answer one query. `allow_external` is caller policy for external
    /// augmentation; it only ever applies to the direct path.
    pub async fn answer(
        &self,
        query: &str,
        conversation_id: Option<&str>,
        allow_external: bool,
        stream_to: Option<TokenSink>,
    ) -> Result<SearchResponse, PipelineError> {
        let date_created = chrono::Utc::now().timestamp_millis();

        let history = match conversation_id {
            Some(id) => history::reconstruct(&self.pool, id).await?,
            None => Vec::new(),
        };

        let decision = classifier::classify(self.chat.as_ref(), &history, query).await?;

        match decision {
            Decision::Clarify(text) => {
                debug!("classifier asked for clarification");
                if let Some(id) = conversation_id {
                    storage::append_messages(&self.pool, id, &[("human", query), ("ai", &text)])
                        .await
                        .context("persist clarification exchange")?;
                }
                Ok(SearchResponse {
                    user_query: query.to_string(),
                    response: text,
                    response_type: ResponseType::Direct,
                    locations: Vec::new(),
                    date_created,
                    conversation_id: conversation_id.map(str::to_string),
                })
            }
            Decision::Route {
                kind,
                conversation_id: routed_id,
                query: summarized,
            } => {
                // The caller's id wins; the classifier's echo covers callers
                // that only threaded it through the conversation itself.
                let conversation_id = conversation_id.map(str::to_string).or(routed_id);
                info!(?kind, "dispatching summarized query");

                let retriever = match kind {
                    SearchKind::Direct => &self.direct,
                    SearchKind::Location => &self.location,
                };
                let mut docs = retriever.retrieve(&summarized).await?;

                let sufficient = judge::judge(self.chat.as_ref(), &summarized, &docs).await;
                let external_allowed = allow_external && kind == SearchKind::Direct;
                if !sufficient && external_allowed {
                    info!("context judged insufficient, fetching external context");
                    match augment::fetch_external_context(
                        self.chat.as_ref(),
                        conversation_id.as_deref(),
                        &summarized,
                    )
                    .await
                    {
                        Augmentation::Snippet(doc) => docs.push(doc),
                        Augmentation::Unavailable => debug!("no external context available"),
                    }
                }

                let result = composer::compose(
                    self.chat.as_ref(),
                    &self.pool,
                    conversation_id.as_deref(),
                    &summarized,
                    docs,
                    &history,
                    stream_to,
                )
                .await?;

                let (response_type, locations) = match kind {
                    SearchKind::Direct => (ResponseType::Direct, Vec::new()),
                    SearchKind::Location => {
                        let mut parsed = Vec::with_capacity(result.sources.len());
                        for doc in &result.sources {
                            parsed.push(
                                serde_json::from_str(&doc.content)
                                    .context("location document is not valid JSON")?,
                            );
                        }
                        (ResponseType::Location, parsed)
                    }
                };

                Ok(SearchResponse {
                    user_query: query.to_string(),
                    response: result.answer,
                    response_type,
                    locations,
                    date_created,
                    conversation_id,
                })
            }
        }
    }
}

pub fn build_registry(config: &AppConfig) -> ProviderRegistry {
    let mut reg = ProviderRegistry::new().with_embedding("noop", Arc::new(NoopProvider));

    if let (Some(key), Some(base)) = (
        std::env::var_os("OPENAI_API_KEY"),
        std::env::var_os("OPENAI_BASE_URL"),
    ) {
        let provider = OpenAiProvider::new(OpenAiConfig {
            api_key: key.to_string_lossy().into_owned(),
            base_url: base.to_string_lossy().into_owned(),
            embedding_model: config.embeddings.model.clone(),
            chat_model: config.chat.model.clone(),
        });
        reg = reg
            .with_embedding("openai", Arc::new(provider.clone()))
            .with_chat("openai", Arc::new(provider));
    }

    reg.set_preferred_embedding(&config.embeddings.provider)
        .set_preferred_chat(&config.chat.provider)
}

pub fn build_vector_retriever(
    config: &AppConfig,
    registry: &ProviderRegistry,
) -> anyhow::Result<VectorRetriever> {
    let url = config
        .vectors
        .url
        .as_ref()
        .context("vectors.url is not configured")?;
    let client = QdrantClient::new(QdrantConfig {
        url: url.clone(),
        collection: config.vectors.collection.clone(),
        api_key: std::env::var("QDRANT_API_KEY").ok(),
    });
    let embeddings = registry.embedding(Some(&config.embeddings.provider))?;
    Ok(VectorRetriever::new(
        client,
        embeddings,
        config.retrieval.top_k,
        config.retrieval.fetch_k,
        config.retrieval.mmr_lambda,
    ))
}

pub async fn build_location_retriever(
    pool: &SqlitePool,
    config: &AppConfig,
    registry: &ProviderRegistry,
) -> anyhow::Result<TableColumnRetriever> {
    let embeddings = registry.embedding(Some(&config.embeddings.provider))?;
    TableColumnRetriever::build(pool, embeddings, config.retrieval.location_top_k).await
}
