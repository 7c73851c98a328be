use providers::ProviderError;
use thiserror::Error;

/// Terminal pipeline outcomes that are not normal answers. A classification
/// refusal must stay distinguishable from transport or data-source failures
/// so the caller can surface it explicitly.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("classification refused: {0}")]
    ClassificationRefused(String),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
