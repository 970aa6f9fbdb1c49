/// HTTP Server logic
use crate::http::types::{Match, SimilarityRequest, SimilarityResponse};
use crate::{shutdown, ErrorResponse, ErrorType, Info, ResponseMetadata};
use anyhow::Context;
use axum::extract::{DefaultBodyLimit, Extension};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::routing::{get, post};
use axum::{http, Json, Router};
use axum_tracing_opentelemetry::middleware::OtelAxumLayer;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Instant;
use text_similarity_core::infer::Infer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::instrument;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

///Text Similarity Inference endpoint info
#[utoipa::path(
get,
tag = "Text Similarity Inference",
path = "/info",
responses((status = 200, description = "Served model info", body = Info))
)]
#[instrument]
async fn get_model_info(info: Extension<Info>) -> Json<Info> {
    Json(info.0)
}

#[utoipa::path(
get,
tag = "Text Similarity Inference",
path = "/health",
responses(
(status = 200, description = "Everything is working fine"),
(status = 503, description = "Embedding server is down", body = ErrorResponse,
example = json ! ({"error": "unhealthy", "error_type": "unhealthy"})),
)
)]
#[instrument(skip(infer))]
/// Health check method
async fn health(infer: Extension<Infer>) -> Result<(), (StatusCode, Json<ErrorResponse>)> {
    match infer.health().await {
        true => Ok(()),
        false => Err(ErrorResponse {
            error: "unhealthy".to_string(),
            error_type: ErrorType::Unhealthy,
        })?,
    }
}

/// Rank documents by similarity to a query
#[utoipa::path(
post,
tag = "Text Similarity Inference",
path = "/similarity",
request_body = SimilarityRequest,
responses(
(status = 200, description = "Documents ordered by descending similarity", body = SimilarityResponse),
(status = 400, description = "Invalid input", body = ErrorResponse,
example = json ! ({"error": "Input validation error: `documents` cannot be empty", "error_type": "validation"})),
(status = 429, description = "Model is overloaded", body = ErrorResponse,
example = json ! ({"error": "Model is overloaded", "error_type": "overloaded"})),
(status = 500, description = "Embedding server broke its contract", body = ErrorResponse,
example = json ! ({"error": "Embedding contract violation: expected 2 embeddings, got 1", "error_type": "contract"})),
(status = 502, description = "Embedding error", body = ErrorResponse,
example = json ! ({"error": "Embedding error: model exploded", "error_type": "embedding"})),
)
)]
#[instrument(
    skip_all,
    fields(
        total_time,
        query_inference_time,
        documents_inference_time,
        ranking_time,
        compute_chars,
        compute_documents,
    )
)]
async fn similarity(
    infer: Extension<Infer>,
    Json(req): Json<SimilarityRequest>,
) -> Result<(HeaderMap, Json<SimilarityResponse>), (StatusCode, Json<ErrorResponse>)> {
    let span = tracing::Span::current();
    let start_time = Instant::now();

    let counter = metrics::counter!("ts_request_count", "method" => "similarity");
    counter.increment(1);

    let query = req.query.unwrap_or_default();
    let documents = req.documents.unwrap_or_default();

    let compute_chars = query.chars().count()
        + documents
            .iter()
            .map(|document| document.chars().count())
            .sum::<usize>();
    let compute_documents = documents.len();

    let permit = infer.try_acquire_permit().map_err(ErrorResponse::from)?;
    let response = infer
        .rank(query, documents, permit)
        .await
        .map_err(ErrorResponse::from)?;

    let metadata = ResponseMetadata::new(
        compute_chars,
        compute_documents,
        start_time,
        &response.metadata,
    );
    metadata.record_span(&span);
    metadata.record_metrics();

    let counter = metrics::counter!("ts_request_success", "method" => "similarity");
    counter.increment(1);

    let best_matches = response
        .matches
        .into_iter()
        .map(|m| Match {
            document: m.document,
            similarity: m.score,
        })
        .collect();

    let headers = HeaderMap::from(metadata);

    tracing::info!("Success");

    Ok((headers, Json(SimilarityResponse { best_matches })))
}

/// Prometheus metrics scrape endpoint
#[utoipa::path(
get,
tag = "Text Similarity Inference",
path = "/metrics",
responses((status = 200, description = "Prometheus Metrics", body = String))
)]
async fn metrics(prom_handle: Extension<PrometheusHandle>) -> String {
    prom_handle.render()
}

/// Serving method
pub async fn run(
    infer: Infer,
    info: Info,
    addr: SocketAddr,
    prom_builder: PrometheusBuilder,
    payload_limit: usize,
    cors_allow_origin: Option<Vec<String>>,
) -> Result<(), anyhow::Error> {
    // OpenAPI documentation
    #[derive(OpenApi)]
    #[openapi(
    paths(
    get_model_info,
    health,
    similarity,
    metrics,
    ),
    components(
    schemas(
    Info,
    SimilarityRequest,
    Match,
    SimilarityResponse,
    ErrorResponse,
    ErrorType,
    )
    ),
    tags(
    (name = "Text Similarity Inference", description = "Text Similarity Inference API")
    ),
    info(
    title = "Text Similarity Inference",
    license(
    name = "Apache 2.0",
    url = "https://www.apache.org/licenses/LICENSE-2.0"
    )
    )
    )]
    struct ApiDoc;

    // CORS allowed origins
    let allow_origin: Option<AllowOrigin> = match cors_allow_origin {
        Some(cors_allow_origin) => {
            let origins = cors_allow_origin
                .iter()
                .map(|origin| origin.parse::<HeaderValue>())
                .collect::<Result<Vec<_>, _>>()
                .context("invalid CORS origin")?;
            Some(AllowOrigin::list(origins))
        }
        None => None,
    };

    let prom_handle = prom_builder
        .install_recorder()
        .context("failed to install metrics recorder")?;

    // CORS layer
    let allow_origin = allow_origin.unwrap_or(AllowOrigin::any());
    let cors_layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([http::header::CONTENT_TYPE])
        .allow_origin(allow_origin);

    // Create router
    let app = Router::new()
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        // Base routes
        .route("/info", get(get_model_info))
        .route("/similarity", post(similarity))
        .route("/compute_similarity", post(similarity))
        .route("/", post(similarity))
        // Base Health route
        .route("/health", get(health))
        // Liveness aliases for load balancers and orchestrators
        .route("/", get(health))
        .route("/ping", get(health))
        // Prometheus metrics route
        .route("/metrics", get(metrics))
        .layer(DefaultBodyLimit::max(payload_limit))
        .layer(Extension(infer))
        .layer(Extension(info))
        .layer(Extension(prom_handle.clone()))
        .layer(OtelAxumLayer::default())
        .layer(cors_layer);

    // Run server
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("could not bind {addr}"))?;

    tracing::info!("Starting HTTP server: {}", &addr);
    tracing::info!("Ready");

    axum::serve(listener, app)
        // Wait until all requests are finished to shut down
        .with_graceful_shutdown(shutdown::shutdown_signal())
        .await?;

    Ok(())
}

impl From<&ErrorType> for StatusCode {
    fn from(value: &ErrorType) -> Self {
        match value {
            ErrorType::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
            ErrorType::Embedding => StatusCode::BAD_GATEWAY,
            ErrorType::Contract => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorType::Overloaded => StatusCode::TOO_MANY_REQUESTS,
            ErrorType::Validation => StatusCode::BAD_REQUEST,
        }
    }
}

/// Convert to Axum supported formats
impl From<ErrorResponse> for (StatusCode, Json<ErrorResponse>) {
    fn from(err: ErrorResponse) -> Self {
        (StatusCode::from(&err.error_type), Json(err))
    }
}
