//! # Request Metrics
//!
//! HTTP request and error counters kept in atomics and bumped by
//! [`metrics_middleware`]. Domain counters (obligations materialized,
//! reminders dispatched, reviews decided) are recorded by the engine through
//! the `metrics` facade and rendered by the Prometheus exporter handle when
//! the binary has installed one.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use metrics_exporter_prometheus::PrometheusHandle;

/// Shared request counters.
#[derive(Debug, Clone, Default)]
pub struct ApiMetrics {
    request_count: Arc<AtomicU64>,
    client_error_count: Arc<AtomicU64>,
    server_error_count: Arc<AtomicU64>,
}

impl ApiMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    /// 4xx and 5xx responses.
    pub fn errors(&self) -> u64 {
        self.client_error_count.load(Ordering::Relaxed) + self.server_error_count.load(Ordering::Relaxed)
    }

    fn record(&self, status: axum::http::StatusCode) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        if status.is_client_error() {
            self.client_error_count.fetch_add(1, Ordering::Relaxed);
        } else if status.is_server_error() {
            self.server_error_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Prometheus text exposition of the HTTP counters followed by whatever
    /// the exporter handle holds.
    pub fn render(&self, exporter: Option<&PrometheusHandle>) -> String {
        let mut out = String::new();
        let counters = [
            ("comply_http_requests_total", "Total HTTP requests", self.requests()),
            (
                "comply_http_client_errors_total",
                "HTTP responses with a 4xx status",
                self.client_error_count.load(Ordering::Relaxed),
            ),
            (
                "comply_http_server_errors_total",
                "HTTP responses with a 5xx status",
                self.server_error_count.load(Ordering::Relaxed),
            ),
        ];
        for (name, help, value) in counters {
            let _ = writeln!(out, "# HELP {name} {help}");
            let _ = writeln!(out, "# TYPE {name} counter");
            let _ = writeln!(out, "{name} {value}");
        }
        if let Some(handle) = exporter {
            out.push_str(&handle.render());
        }
        out
    }
}

/// Middleware that increments request and error counters.
pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let metrics = request.extensions().get::<ApiMetrics>().cloned();

    let response = next.run(request).await;

    if let Some(m) = metrics {
        m.record(response.status());
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn counts_requests_and_errors() {
        let metrics = ApiMetrics::new();
        metrics.record(StatusCode::OK);
        metrics.record(StatusCode::NOT_FOUND);
        metrics.record(StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(metrics.requests(), 3);
        assert_eq!(metrics.errors(), 2);
    }

    #[test]
    fn clones_share_counters() {
        let metrics = ApiMetrics::new();
        let clone = metrics.clone();
        clone.record(StatusCode::CREATED);
        assert_eq!(metrics.requests(), 1);
    }

    #[test]
    fn renders_prometheus_text() {
        let metrics = ApiMetrics::new();
        metrics.record(StatusCode::UNPROCESSABLE_ENTITY);
        let text = metrics.render(None);
        assert!(text.contains("# TYPE comply_http_requests_total counter"));
        assert!(text.contains("comply_http_requests_total 1"));
        assert!(text.contains("comply_http_client_errors_total 1"));
        assert!(text.contains("comply_http_server_errors_total 0"));
    }
}
