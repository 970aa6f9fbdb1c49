use anyhow::Result;
use clap::Parser;
use opentelemetry::global;
use std::time::Duration;
use text_similarity_backend::EmbeddingApi;
use veil::Redact;

/// App Configuration
#[derive(Parser, Redact)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// Base url of the embedding server, e.g. a Text Embeddings Inference deployment serving
    /// `nomic-ai/modernbert-embed-base`
    #[clap(default_value = "http://127.0.0.1:8080", long, env)]
    embedding_url: String,

    /// API exposed by the embedding server.
    ///
    /// `tei` calls `POST /embed`, `openai` calls `POST /v1/embeddings`.
    #[clap(default_value = "tei", long, env, value_enum)]
    embedding_api: EmbeddingApi,

    /// The name of the embedding model.
    /// Sent with every request to OpenAI compatible servers and reported by `/info`.
    #[clap(long, env)]
    embedding_model: Option<String>,

    /// Bearer token sent to the embedding server
    #[clap(long, env)]
    #[redact(partial)]
    embedding_api_token: Option<String>,

    /// Maximum number of inputs sent to the embedding server in a single call.
    /// Larger document lists are split into consecutive calls.
    ///
    /// Text Embeddings Inference refuses batches larger than its `--max-client-batch-size`
    /// (32 by default).
    #[clap(default_value = "32", long, env)]
    embedding_batch_size: usize,

    /// Ask the embedding server to truncate inputs that are longer than the model maximum
    /// input length instead of failing. Only used with `--embedding-api tei`.
    #[clap(long, env)]
    embedding_truncate: bool,

    /// Deadline in milliseconds for a single call to the embedding server, queueing included.
    /// `0` disables the deadline.
    #[clap(default_value = "30000", long, env)]
    embedding_timeout_ms: u64,

    /// The maximum amount of concurrent requests for this particular deployment.
    /// Having a low limit will refuse clients requests instead of having them
    /// wait for too long and is usually good to handle backpressure correctly.
    #[clap(default_value = "512", long, env)]
    max_concurrent_requests: usize,

    /// The IP address to listen on
    #[clap(default_value = "0.0.0.0", long, env)]
    hostname: String,

    /// The port to listen on.
    #[clap(default_value = "3000", long, short, env)]
    port: u16,

    /// Payload size limit in bytes
    ///
    /// Default is 2MB
    #[clap(default_value = "2000000", long, env)]
    payload_limit: usize,

    /// Outputs the logs in JSON format (useful for telemetry)
    #[clap(long, env)]
    json_output: bool,

    // Whether or not to include the log trace through spans
    #[clap(long, env)]
    disable_spans: bool,

    /// The grpc endpoint for opentelemetry. Telemetry is sent to this endpoint as OTLP over gRPC.
    /// e.g. `http://localhost:4317`
    #[clap(long, env)]
    otlp_endpoint: Option<String>,

    /// The service name for opentelemetry.
    /// e.g. `text-similarity-inference.server`
    #[clap(default_value = "text-similarity-inference.server", long, env)]
    otlp_service_name: String,

    /// The Prometheus port to listen on.
    #[clap(default_value = "9000", long, env)]
    prometheus_port: u16,

    #[clap(long, env)]
    cors_allow_origin: Option<Vec<String>>,
}

impl Args {
    pub fn embedding_timeout(&self) -> Option<Duration> {
        match self.embedding_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn embedding_batch_size(&self) -> Result<Option<usize>> {
        match self.embedding_batch_size {
            0 => anyhow::bail!("`--embedding-batch-size` must be greater than 0"),
            size => Ok(Some(size)),
        }
    }
}


#[tokio::main]
async fn main() -> Result<()> {
    // Pattern match configuration
    let args: Args = Args::parse();

    // Initialize logging and telemetry
    let global_tracer = text_similarity_router::init_logging(
        args.otlp_endpoint.as_ref(),
        args.otlp_service_name.clone(),
        args.json_output,
        args.disable_spans,
    );

    tracing::info!("{args:?}");

    let embedding_timeout = args.embedding_timeout();
    let embedding_batch_size = args.embedding_batch_size()?;

    text_similarity_router::run(
        args.embedding_url,
        args.embedding_api,
        args.embedding_model,
        args.embedding_api_token,
        embedding_batch_size,
        args.embedding_truncate,
        embedding_timeout,
        args.max_concurrent_requests,
        Some(args.hostname),
        args.port,
        args.payload_limit,
        args.prometheus_port,
        args.cors_allow_origin,
    )
    .await?;

    if global_tracer {
        // Shutdown tracer
        global::shutdown_tracer_provider();
    }
    Ok(())
}
