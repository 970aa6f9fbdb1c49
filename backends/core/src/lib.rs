#[cfg(feature = "clap")]
use clap::ValueEnum;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// A single embedding vector as returned by a provider
pub type Embedding = Vec<f32>;

/// Embedding provider contract.
///
/// `embed` must return one vector per input, in input order, with the same dimensionality for the
/// lifetime of the provider. Implementations may block for the whole inference; they are always
/// driven from a dedicated worker thread.
pub trait EmbeddingBackend {
    fn health(&self) -> Result<(), BackendError>;

    fn max_batch_size(&self) -> Option<usize> {
        None
    }

    fn embed(&self, inputs: Vec<String>) -> Result<Vec<Embedding>, BackendError>;
}

/// Wire dialect spoken by a remote embedding server
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "clap", derive(ValueEnum))]
pub enum EmbeddingApi {
    /// Text Embeddings Inference `/embed` route
    Tei,
    /// OpenAI compatible `/v1/embeddings` route
    #[cfg_attr(feature = "clap", value(name = "openai"))]
    OpenAi,
}

impl fmt::Display for EmbeddingApi {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EmbeddingApi::Tei => write!(f, "tei"),
            EmbeddingApi::OpenAi => write!(f, "openai"),
        }
    }
}

#[derive(Debug, Error, Clone)]
pub enum BackendError {
    #[error("No backend found")]
    NoBackend,
    #[error("Could not start backend: {0}")]
    Start(String),
    #[error("{0}")]
    Inference(String),
    /// The provider answered but broke the one-vector-per-input contract
    #[error("Invalid embedding server response: {0}")]
    InvalidResponse(String),
    #[error("Backend is unhealthy")]
    Unhealthy,
    #[error("Embedding request timed out after {0:?}")]
    Timeout(Duration),
}
