//! Retrieval strategies behind one interface. The generic vector variant
//! searches the knowledge base with diversity-aware re-ranking; the
//! structured variant lives in `locations`.

use crate::models::RetrievedDocument;
use anyhow::Context;
use providers::qdrant::QdrantClient;
use providers::EmbeddingProvider;
use std::collections::HashMap;
use std::sync::Arc;

#[async_trait::async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, query: &str) -> anyhow::Result<Vec<RetrievedDocument>>;
}

/// Nearest-neighbor search over the indexed knowledge base, re-ranked with
/// maximal marginal relevance so near-duplicate top hits are suppressed.
pub struct VectorRetriever {
    client: QdrantClient,
    embeddings: Arc<dyn EmbeddingProvider>,
    k: usize,
    fetch_k: usize,
    lambda: f32,
}

impl VectorRetriever {
    pub fn new(
        client: QdrantClient,
        embeddings: Arc<dyn EmbeddingProvider>,
        k: usize,
        fetch_k: usize,
        lambda: f32,
    ) -> Self {
        Self {
            client,
            embeddings,
            k,
            fetch_k,
            lambda,
        }
    }
}

#[async_trait::async_trait]
impl Retriever for VectorRetriever {
    async fn retrieve(&self, query: &str) -> anyhow::Result<Vec<RetrievedDocument>> {
        let query_vector = self
            .embeddings
            .embed_query(query)
            .await
            .context("embed query")?;

        let resp = self
            .client
            .search(query_vector.clone(), self.fetch_k as u64, true)
            .await
            .context("vector search")?;

        let vectors: Vec<Vec<f32>> = resp
            .result
            .iter()
            .map(|r| r.vector.clone().unwrap_or_default())
            .collect();
        let selected = mmr_select(&query_vector, &vectors, self.k, self.lambda);

        let mut docs = Vec::with_capacity(selected.len());
        for idx in selected {
            let hit = &resp.result[idx];
            let mut metadata: HashMap<String, serde_json::Value> = hit
                .payload
                .as_ref()
                .and_then(|p| p.as_object())
                .map(|o| o.clone().into_iter().collect())
                .unwrap_or_default();
            metadata
                .entry("source".to_string())
                .or_insert_with(|| serde_json::Value::String("knowledge_base".to_string()));
            let content = metadata
                .get("text")
                .and_then(|t| t.as_str())
                .unwrap_or_default()
                .to_string();
            docs.push(RetrievedDocument {
                content,
                metadata,
                score: Some(hit.score),
            });
        }
        Ok(docs)
    }
}

/// Greedy maximal-marginal-relevance selection. Returns candidate indices
/// in pick order. `lambda` weights relevance to the query against maximum
/// similarity to anything already picked.
pub(crate) fn mmr_select(
    query: &[f32],
    candidates: &[Vec<f32>],
    k: usize,
    lambda: f32,
) -> Vec<usize> {
    let mut remaining: Vec<usize> = (0..candidates.len()).collect();
    let mut picked: Vec<usize> = Vec::with_capacity(k.min(candidates.len()));

    while picked.len() < k && !remaining.is_empty() {
        let mut best = remaining[0];
        let mut best_score = f32::NEG_INFINITY;
        for &idx in &remaining {
            let relevance = cosine_similarity(query, &candidates[idx]);
            let redundancy = picked
                .iter()
                .map(|&p| cosine_similarity(&candidates[idx], &candidates[p]))
                .fold(0.0_f32, f32::max);
            let score = lambda * relevance - (1.0 - lambda) * redundancy;
            if score > best_score {
                best_score = score;
                best = idx;
            }
        }
        picked.push(best);
        remaining.retain(|&idx| idx != best);
    }
    picked
}

pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
