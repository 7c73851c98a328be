use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub embeddings: EmbeddingConfig,
    pub chat: ChatConfig,
    pub vectors: VectorConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    pub provider: String,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorConfig {
    pub url: Option<String>,
    pub collection: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Results kept after diversity re-ranking on the direct path.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Candidates fetched from the vector store before re-ranking.
    #[serde(default = "default_fetch_k")]
    pub fetch_k: usize,
    /// Relevance vs. diversity weight for MMR, in [0, 1].
    #[serde(default = "default_mmr_lambda")]
    pub mmr_lambda: f32,
    /// Rows returned by the structured location retriever.
    #[serde(default = "default_location_top_k")]
    pub location_top_k: usize,
}

fn default_top_k() -> usize {
    4
}

fn default_fetch_k() -> usize {
    20
}

fn default_mmr_lambda() -> f32 {
    0.5
}

fn default_location_top_k() -> usize {
    5
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            fetch_k: default_fetch_k(),
            mmr_lambda: default_mmr_lambda(),
            location_top_k: default_location_top_k(),
        }
    }
}

pub fn load(path: Option<&str>) -> anyhow::Result<AppConfig> {
    let mut settings = config::Config::builder();
    if let Some(p) = path {
        settings = settings.add_source(config::File::with_name(p));
    } else {
        settings = settings.add_source(config::File::with_name("config/default").required(false));
    }
    let cfg = settings.build()?;
    Ok(cfg.try_deserialize()?)
}
