pub mod infer;
pub mod ranker;
pub mod validation;

use text_similarity_backend::BackendError;
use thiserror::Error;
use tokio::sync::TryAcquireError;

#[derive(Error, Debug)]
pub enum SimilarityError {
    #[error("Input validation error: {0}")]
    InvalidInput(String),
    #[error("Model is overloaded")]
    Overloaded(#[from] TryAcquireError),
    #[error("Embedding error: {0}")]
    EmbeddingFailure(#[from] BackendError),
    #[error("Embedding contract violation: {0}")]
    EmbeddingContractViolation(String),
}
