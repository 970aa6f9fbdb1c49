use crate::ranker::{check_embeddings, rank_embeddings, ScoredMatch};
use crate::validation::validate;
use crate::SimilarityError;
use std::sync::Arc;
use std::time::{Duration, Instant};
use text_similarity_backend::{Backend, BackendError};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::instrument;

/// Inference struct
#[derive(Debug, Clone)]
pub struct Infer {
    /// Inference limit
    limit_concurrent_requests: Arc<Semaphore>,
    backend: Backend,
}

impl Infer {
    pub fn new(backend: Backend, max_concurrent_requests: usize) -> Self {
        // Inference limit with a semaphore
        let semaphore = Arc::new(Semaphore::new(max_concurrent_requests));

        Self {
            limit_concurrent_requests: semaphore,
            backend,
        }
    }

    #[instrument(skip(self))]
    pub fn try_acquire_permit(&self) -> Result<OwnedSemaphorePermit, SimilarityError> {
        // Limit concurrent requests by acquiring a permit from the semaphore
        self.clone()
            .limit_concurrent_requests
            .try_acquire_owned()
            .map_err(|err| {
                let counter = metrics::counter!("ts_request_failure", "err" => "overloaded");
                counter.increment(1);
                tracing::error!("{err}");
                SimilarityError::from(err)
            })
    }

    /// Rank `documents` by similarity to `query`.
    ///
    /// The provider is called exactly twice, first for the query then for all documents. Nothing
    /// is embedded when the request is invalid.
    #[instrument(skip_all, fields(documents = documents.len()))]
    pub async fn rank(
        &self,
        query: String,
        documents: Vec<String>,
        _permit: OwnedSemaphorePermit,
    ) -> Result<RankResponse, SimilarityError> {
        validate(&query, &documents).map_err(|err| {
            let counter = metrics::counter!("ts_request_failure", "err" => "validation");
            counter.increment(1);
            tracing::error!("{err}");
            err
        })?;

        let (query_embeddings, query_inference) = self
            .backend
            .embed(vec![query])
            .await
            .map_err(embedding_failure)?;
        check_embeddings(&query_embeddings, 1, None).map_err(contract_violation)?;

        let (document_embeddings, documents_inference) = self
            .backend
            .embed(documents.clone())
            .await
            .map_err(embedding_failure)?;

        let start_time = Instant::now();
        let matches = rank_embeddings(&query_embeddings[0], documents, &document_embeddings)
            .map_err(contract_violation)?;

        Ok(RankResponse {
            matches,
            metadata: InferMetadata {
                query_inference,
                documents_inference,
                ranking: start_time.elapsed(),
            },
        })
    }

    #[instrument(skip(self))]
    pub async fn health(&self) -> bool {
        self.backend.health().await.is_ok()
    }
}

fn embedding_failure(err: BackendError) -> SimilarityError {
    if let BackendError::InvalidResponse(message) = err {
        tracing::error!("{message}");
        return contract_violation(SimilarityError::EmbeddingContractViolation(message));
    }
    let counter = metrics::counter!("ts_request_failure", "err" => "embedding");
    counter.increment(1);
    tracing::error!("{err}");
    SimilarityError::from(err)
}

fn contract_violation(err: SimilarityError) -> SimilarityError {
    let counter = metrics::counter!("ts_request_failure", "err" => "contract");
    counter.increment(1);
    err
}

#[derive(Debug)]
pub struct InferMetadata {
    pub query_inference: Duration,
    pub documents_inference: Duration,
    pub ranking: Duration,
}

#[derive(Debug)]
pub struct RankResponse {
    pub matches: Vec<ScoredMatch>,
    pub metadata: InferMetadata,
}
