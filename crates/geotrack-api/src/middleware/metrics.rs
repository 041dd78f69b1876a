//! # HTTP Metrics
//!
//! Request counters and latency histograms recorded through the `metrics`
//! facade. The binary installs the Prometheus recorder; without one these
//! calls are no-ops.

use std::time::Instant;

use axum::extract::{MatchedPath, Request};
use axum::middleware::Next;
use axum::response::Response;

pub const HTTP_REQUESTS: &str = "geotrack_http_requests_total";
pub const HTTP_ERRORS: &str = "geotrack_http_errors_total";
pub const HTTP_DURATION: &str = "geotrack_http_request_duration_seconds";

/// Register descriptions for the HTTP metrics.
pub fn describe_metrics() {
    metrics::describe_counter!(HTTP_REQUESTS, "Total HTTP requests");
    metrics::describe_counter!(HTTP_ERRORS, "Total HTTP errors (4xx and 5xx)");
    metrics::describe_histogram!(
        HTTP_DURATION,
        metrics::Unit::Seconds,
        "HTTP request duration in seconds"
    );
}

/// Records one request. The route template is used as the `path` label so
/// identifiers in the URL do not multiply series.
pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let method = request.method().as_str().to_owned();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".to_owned());
    let started = Instant::now();

    let response = next.run(request).await;

    let status = response.status();
    let code = status.as_u16().to_string();
    metrics::counter!(
        HTTP_REQUESTS,
        "method" => method.clone(),
        "path" => path.clone(),
        "status" => code.clone()
    )
    .increment(1);
    if status.is_client_error() || status.is_server_error() {
        metrics::counter!(
            HTTP_ERRORS,
            "method" => method.clone(),
            "path" => path.clone(),
            "status" => code
        )
        .increment(1);
    }
    metrics::histogram!(HTTP_DURATION, "method" => method, "path" => path)
        .record(started.elapsed().as_secs_f64());

    response
}
