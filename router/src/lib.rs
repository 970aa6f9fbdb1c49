/// Text Similarity Inference Webserver
pub mod logging;
mod prometheus;
mod shutdown;

#[cfg(feature = "http")]
mod http;

use anyhow::{Context, Result};
use serde::Serialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};
use text_similarity_backend::{Backend, BackendConfig, EmbeddingApi};
use text_similarity_core::infer::{Infer, InferMetadata};
use text_similarity_core::SimilarityError;
use tracing::Span;

pub use logging::init_logging;

#[cfg(not(feature = "http"))]
compile_error!("Feature `http` must be enabled.");

/// Create the embedding backend and serve the similarity API
#[allow(clippy::too_many_arguments)]
pub async fn run(
    embedding_url: String,
    embedding_api: EmbeddingApi,
    embedding_model: Option<String>,
    embedding_api_token: Option<String>,
    embedding_batch_size: Option<usize>,
    embedding_truncate: bool,
    embedding_timeout: Option<Duration>,
    max_concurrent_requests: usize,
    hostname: Option<String>,
    port: u16,
    payload_limit: usize,
    prometheus_port: u16,
    cors_allow_origin: Option<Vec<String>>,
) -> Result<()> {
    let backend = Backend::new(BackendConfig {
        url: embedding_url.clone(),
        api: embedding_api,
        model: embedding_model.clone(),
        api_token: embedding_api_token,
        max_batch_size: embedding_batch_size,
        truncate: embedding_truncate,
        timeout: embedding_timeout,
    })
    .await
    .context("Could not create backend")?;

    // The embedding server may still be loading its model: only warn
    tracing::info!("Checking embedding server health");
    match backend.health().await {
        Ok(()) => tracing::info!("Embedding server is healthy"),
        Err(err) => tracing::warn!("Embedding server is not healthy yet: {err}"),
    }

    let infer = Infer::new(backend, max_concurrent_requests);

    let info = Info {
        embedding_url,
        embedding_api: embedding_api.to_string(),
        embedding_model,
        embedding_batch_size,
        embedding_timeout_ms: embedding_timeout.map(|t| t.as_millis() as u64),
        max_concurrent_requests,
        version: env!("CARGO_PKG_VERSION"),
        sha: option_env!("VERGEN_GIT_SHA"),
        docker_label: option_env!("DOCKER_LABEL"),
    };

    let addr = match hostname.unwrap_or("0.0.0.0".to_string()).parse::<IpAddr>() {
        Ok(ip) => SocketAddr::new(ip, port),
        Err(_) => {
            tracing::warn!("Invalid hostname, defaulting to 0.0.0.0");
            SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), port)
        }
    };

    let prom_builder = prometheus::prometheus_builer(addr, prometheus_port)?;

    #[cfg(feature = "http")]
    {
        let server = tokio::spawn(async move {
            http::server::run(
                infer,
                info,
                addr,
                prom_builder,
                payload_limit,
                cors_allow_origin,
            )
            .await
        });
        server.await??;
    }

    Ok(())
}

#[derive(Clone, Debug, Serialize)]
#[cfg_attr(feature = "http", derive(utoipa::ToSchema))]
pub struct Info {
    /// Embedding provider
    #[cfg_attr(feature = "http", schema(example = "http://127.0.0.1:8080"))]
    pub embedding_url: String,
    #[cfg_attr(feature = "http", schema(example = "tei"))]
    pub embedding_api: String,
    #[cfg_attr(
        feature = "http",
        schema(nullable = true, example = "nomic-ai/modernbert-embed-base")
    )]
    pub embedding_model: Option<String>,
    #[cfg_attr(feature = "http", schema(nullable = true, example = "32"))]
    pub embedding_batch_size: Option<usize>,
    #[cfg_attr(feature = "http", schema(nullable = true, example = "30000"))]
    pub embedding_timeout_ms: Option<u64>,
    /// Router Parameters
    #[cfg_attr(feature = "http", schema(example = "512"))]
    pub max_concurrent_requests: usize,
    /// Router Info
    #[cfg_attr(feature = "http", schema(example = "0.1.0"))]
    pub version: &'static str,
    #[cfg_attr(feature = "http", schema(nullable = true, example = "null"))]
    pub sha: Option<&'static str>,
    #[cfg_attr(feature = "http", schema(nullable = true, example = "null"))]
    pub docker_label: Option<&'static str>,
}

#[derive(Serialize)]
#[cfg_attr(feature = "http", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    Unhealthy,
    Embedding,
    Contract,
    Overloaded,
    Validation,
}

#[derive(Serialize)]
#[cfg_attr(feature = "http", derive(utoipa::ToSchema))]
pub struct ErrorResponse {
    pub error: String,
    pub error_type: ErrorType,
}

impl From<SimilarityError> for ErrorResponse {
    fn from(err: SimilarityError) -> Self {
        let error_type = match err {
            SimilarityError::InvalidInput(_) => ErrorType::Validation,
            SimilarityError::Overloaded(_) => ErrorType::Overloaded,
            SimilarityError::EmbeddingFailure(_) => ErrorType::Embedding,
            SimilarityError::EmbeddingContractViolation(_) => ErrorType::Contract,
        };
        Self {
            error: err.to_string(),
            error_type,
        }
    }
}

struct ResponseMetadata {
    compute_chars: usize,
    compute_documents: usize,
    start_time: Instant,
    query_inference_time: Duration,
    documents_inference_time: Duration,
    ranking_time: Duration,
}

impl ResponseMetadata {
    fn new(
        compute_chars: usize,
        compute_documents: usize,
        start_time: Instant,
        metadata: &InferMetadata,
    ) -> Self {
        Self {
            compute_chars,
            compute_documents,
            start_time,
            query_inference_time: metadata.query_inference,
            documents_inference_time: metadata.documents_inference,
            ranking_time: metadata.ranking,
        }
    }

    fn record_span(&self, span: &Span) {
        // Tracing metadata
        span.record("compute_chars", self.compute_chars);
        span.record("compute_documents", self.compute_documents);
        span.record("total_time", format!("{:?}", self.start_time.elapsed()));
        span.record(
            "query_inference_time",
            format!("{:?}", self.query_inference_time),
        );
        span.record(
            "documents_inference_time",
            format!("{:?}", self.documents_inference_time),
        );
        span.record("ranking_time", format!("{:?}", self.ranking_time));
    }

    fn record_metrics(&self) {
        // Metrics
        let histogram = metrics::histogram!("ts_request_duration");
        histogram.record(self.start_time.elapsed().as_secs_f64());
        let histogram = metrics::histogram!("ts_query_inference_duration");
        histogram.record(self.query_inference_time.as_secs_f64());
        let histogram = metrics::histogram!("ts_documents_inference_duration");
        histogram.record(self.documents_inference_time.as_secs_f64());
        let histogram = metrics::histogram!("ts_ranking_duration");
        histogram.record(self.ranking_time.as_secs_f64());
        let histogram = metrics::histogram!("ts_request_documents");
        histogram.record(self.compute_documents as f64);
    }
}

#[cfg(feature = "http")]
impl From<ResponseMetadata> for axum::http::HeaderMap {
    fn from(value: ResponseMetadata) -> Self {
        use axum::http::HeaderValue;

        // Headers
        let mut headers = axum::http::HeaderMap::new();
        headers.insert(
            "x-compute-time",
            HeaderValue::from(value.start_time.elapsed().as_millis() as u64),
        );
        headers.insert(
            "x-compute-characters",
            HeaderValue::from(value.compute_chars),
        );
        headers.insert(
            "x-compute-documents",
            HeaderValue::from(value.compute_documents),
        );
        headers.insert(
            "x-query-inference-time",
            HeaderValue::from(value.query_inference_time.as_millis() as u64),
        );
        headers.insert(
            "x-documents-inference-time",
            HeaderValue::from(value.documents_inference_time.as_millis() as u64),
        );
        headers.insert(
            "x-ranking-time",
            HeaderValue::from(value.ranking_time.as_millis() as u64),
        );
        headers
    }
}
