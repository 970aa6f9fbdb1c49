use opentelemetry::trace::TraceError;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::Sampler;
use opentelemetry_sdk::{trace, Resource};
use tracing::Subscriber;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// HTTP client internals are only interesting when asked for explicitly
const DEFAULT_LOG_FILTER: &str = "info,h2=warn,hyper=warn,hyper_util=warn,reqwest=warn";

type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync>;

/// Init logging.
///
/// `LOG_LEVEL` takes `EnvFilter` directives. Spans are exported to `otlp_endpoint` when given.
/// Returns true when a global tracer was installed and must be shut down on exit.
pub fn init_logging(
    otlp_endpoint: Option<&String>,
    otlp_service_name: String,
    json_output: bool,
    disable_spans: bool,
) -> bool {
    let mut layers = vec![fmt_layer(json_output, disable_spans)];

    let mut global_tracer = false;
    if let Some(otlp_endpoint) = otlp_endpoint {
        match otlp_layer(otlp_endpoint, otlp_service_name) {
            Ok(layer) => {
                layers.push(layer);
                global_tracer = true;
            }
            // No subscriber yet
            Err(err) => eprintln!("Could not start OpenTelemetry exporter: {err}"),
        }
    }

    tracing_subscriber::registry()
        .with(log_filter(std::env::var("LOG_LEVEL").ok().as_deref()))
        .with(layers)
        .init();
    global_tracer
}

fn fmt_layer<S>(json_output: bool, disable_spans: bool) -> BoxedLayer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let layer = tracing_subscriber::fmt::layer()
        .with_file(true)
        .with_line_number(true);

    if json_output {
        layer
            .json()
            .flatten_event(true)
            .with_current_span(!disable_spans)
            .with_span_list(!disable_spans)
            .boxed()
    } else {
        layer.boxed()
    }
}

fn otlp_layer<S>(endpoint: &str, service_name: String) -> Result<BoxedLayer<S>, TraceError>
where
    S: Subscriber + for<'a> LookupSpan<'a> + Send + Sync,
{
    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint),
        )
        .with_trace_config(
            trace::config()
                .with_resource(Resource::new(vec![
                    KeyValue::new("service.name", service_name),
                    KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                ]))
                .with_sampler(Sampler::AlwaysOn),
        )
        .install_batch(opentelemetry_sdk::runtime::Tokio)?;

    // W3C trace context, so spans join the caller's trace
    if let Err(err) = init_tracing_opentelemetry::init_propagator() {
        eprintln!("Could not init OpenTelemetry propagator: {err}");
    }

    Ok(tracing_opentelemetry::layer().with_tracer(tracer).boxed())
}

/// Invalid directives fall back to the default filter
fn log_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::filter::LevelFilter;

    #[test]
    fn test_log_filter() {
        assert_eq!(log_filter(None).max_level_hint(), Some(LevelFilter::INFO));
        assert_eq!(
            log_filter(Some("debug")).max_level_hint(),
            Some(LevelFilter::DEBUG)
        );
        assert_eq!(
            log_filter(Some("text_similarity_core=trace")).max_level_hint(),
            Some(LevelFilter::TRACE)
        );
        assert_eq!(
            log_filter(Some("reqwest=loud")).max_level_hint(),
            Some(LevelFilter::INFO)
        );
    }
}
