use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder};

pub(crate) fn prometheus_builer(
    addr: SocketAddr,
    port: u16,
) -> Result<PrometheusBuilder, BuildError> {
    let mut addr = addr;
    addr.set_port(port);

    // Duration buckets
    let duration_matcher = Matcher::Suffix(String::from("duration"));
    let n_duration_buckets = 35;
    let mut duration_buckets = Vec::with_capacity(n_duration_buckets);
    // Minimum duration in seconds
    let mut value = 0.00001;
    for _ in 0..n_duration_buckets {
        // geometric sequence
        value *= 1.5;
        duration_buckets.push(value);
    }

    // Documents per request buckets
    let documents_matcher = Matcher::Full(String::from("ts_request_documents"));
    let documents_buckets: Vec<f64> = (0..16).map(|x| 2.0_f64.powi(x)).collect();

    // Prometheus handler
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(duration_matcher, &duration_buckets)?
        .set_buckets_for_metric(documents_matcher, &documents_buckets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prometheus_builder() {
        let addr: SocketAddr = "127.0.0.1:3000".parse().unwrap();
        assert!(prometheus_builer(addr, 9000).is_ok());
    }
}
