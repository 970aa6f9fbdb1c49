//! Embedding backend backed by a remote embedding server

mod client;

pub use client::Client;
use std::time::Duration;
use text_similarity_backend_core::{BackendError, Embedding, EmbeddingApi, EmbeddingBackend};
use thiserror::Error;
use tokio::runtime::Runtime;

#[derive(Error, Debug, Clone)]
pub enum ClientError {
    #[error("Could not connect to embedding server: {0}")]
    Connection(String),
    #[error("Server error: {0}")]
    Server(String),
    #[error("Invalid response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        let err = if err.is_decode() {
            Self::Decode(err.to_string())
        } else if err.is_status() {
            Self::Server(err.to_string())
        } else {
            Self::Connection(err.to_string())
        };
        tracing::error!("{err}");
        err
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Clone)]
pub struct HttpBackendConfig {
    pub url: String,
    pub api: EmbeddingApi,
    pub model: Option<String>,
    pub api_token: Option<String>,
    pub max_batch_size: Option<usize>,
    pub truncate: bool,
    pub timeout: Option<Duration>,
}

pub struct HttpBackend {
    tokio_runtime: Runtime,
    client: Client,
    max_batch_size: Option<usize>,
}

impl HttpBackend {
    pub fn new(config: HttpBackendConfig) -> std::result::Result<Self, BackendError> {
        if config.max_batch_size == Some(0) {
            return Err(BackendError::Start(
                "`max_batch_size` must be greater than 0".to_string(),
            ));
        }

        let tokio_runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|err| BackendError::Start(format!("Could not start Tokio runtime: {err}")))?;

        let client = Client::new(
            &config.url,
            config.api,
            config.model,
            config.api_token,
            config.truncate,
            config.timeout,
        )
        .map_err(|err| BackendError::Start(err.to_string()))?;

        Ok(Self {
            tokio_runtime,
            client,
            max_batch_size: config.max_batch_size,
        })
    }
}

impl EmbeddingBackend for HttpBackend {
    fn health(&self) -> std::result::Result<(), BackendError> {
        if self.tokio_runtime.block_on(self.client.health()).is_err() {
            return Err(BackendError::Unhealthy);
        }
        Ok(())
    }

    fn max_batch_size(&self) -> Option<usize> {
        self.max_batch_size
    }

    fn embed(&self, inputs: Vec<String>) -> std::result::Result<Vec<Embedding>, BackendError> {
        let chunk_size = self.max_batch_size.unwrap_or(inputs.len()).max(1);

        let mut embeddings = Vec::with_capacity(inputs.len());
        for (i, chunk) in inputs.chunks(chunk_size).enumerate() {
            let results = self
                .tokio_runtime
                .block_on(self.client.embed(chunk))
                .map_err(|err| match err {
                    ClientError::Decode(_) => BackendError::InvalidResponse(err.to_string()),
                    _ => BackendError::Inference(err.to_string()),
                })?;
            // A short chunk followed by a long one would shift every later vector
            if results.len() != chunk.len() {
                return Err(BackendError::InvalidResponse(format!(
                    "batch {i} returned {} embeddings for {} inputs",
                    results.len(),
                    chunk.len()
                )));
            }
            embeddings.extend(results);
        }
        Ok(embeddings)
    }
}
