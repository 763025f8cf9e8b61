use axum::{
    extract::{MatchedPath, Request, State},
    middleware::Next,
    response::Response,
};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;
use std::time::Instant;
use widget_core::error::AppError;

/// Prometheus collectors for the widget. Each instance owns its registry so
/// tests can build as many apps as they like.
pub struct WidgetMetrics {
    registry: Registry,
    pub http_requests_total: IntCounterVec,
    pub http_request_duration_seconds: HistogramVec,
    pub chat_exchanges_total: IntCounterVec,
    pub chat_backend_duration_seconds: HistogramVec,
    pub security_events_total: IntCounterVec,
}

impl WidgetMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let http_requests_total = IntCounterVec::new(
            Opts::new("http_requests_total", "Total number of HTTP requests"),
            &["method", "path", "status"],
        )?;
        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "HTTP request duration in seconds",
            ),
            &["method", "path", "status"],
        )?;
        let chat_exchanges_total = IntCounterVec::new(
            Opts::new("chat_exchanges_total", "Chat exchanges by outcome"),
            &["outcome"],
        )?;
        let chat_backend_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "chat_backend_duration_seconds",
                "Time spent waiting for the chat API",
            )
            .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0]),
            &["outcome"],
        )?;
        let security_events_total = IntCounterVec::new(
            Opts::new("security_events_total", "Blocked inputs and links by kind"),
            &["kind"],
        )?;

        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration_seconds.clone()))?;
        registry.register(Box::new(chat_exchanges_total.clone()))?;
        registry.register(Box::new(chat_backend_duration_seconds.clone()))?;
        registry.register(Box::new(security_events_total.clone()))?;

        Ok(Self {
            registry,
            http_requests_total,
            http_request_duration_seconds,
            chat_exchanges_total,
            chat_backend_duration_seconds,
            security_events_total,
        })
    }

    pub fn render(&self) -> Result<String, AppError> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| AppError::InternalError(e.into()))?;
        String::from_utf8(buffer).map_err(|e| AppError::InternalError(e.into()))
    }
}

/// Count and time every request, labelled by route template.
pub async fn track_http(
    State(metrics): State<Arc<WidgetMetrics>>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(request).await;

    let status = response.status().as_u16().to_string();
    let labels = [method.as_str(), path.as_str(), status.as_str()];
    metrics.http_requests_total.with_label_values(&labels).inc();
    metrics
        .http_request_duration_seconds
        .with_label_values(&labels)
        .observe(start.elapsed().as_secs_f64());

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registries_are_independent() {
        let a = WidgetMetrics::new().unwrap();
        let b = WidgetMetrics::new().unwrap();
        a.chat_exchanges_total.with_label_values(&["succeeded"]).inc();

        assert!(a.render().unwrap().contains("chat_exchanges_total{outcome=\"succeeded\"} 1"));
        assert!(!b.render().unwrap().contains("outcome=\"succeeded\""));
    }
}
