use super::metrics::WidgetMetrics;
use crate::error::FailureCategory;
use crate::security::events::{log_event, SecurityEvent, SecurityEventSink};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeOutcome {
    Succeeded,
    Failed(FailureCategory),
}

impl ExchangeOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ExchangeOutcome::Succeeded => "succeeded",
            ExchangeOutcome::Failed(category) => category.as_str(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExchangeReport<'a> {
    pub scope: &'a str,
    pub session_id: &'a str,
    pub outcome: ExchangeOutcome,
    pub elapsed: Duration,
}

/// Where the controller reports what happened.
pub trait Diagnostics: Send + Sync {
    fn exchange_finished(&self, report: &ExchangeReport<'_>);

    /// A send refused before validation, such as a rate limit hit.
    fn security_event(&self, _event: &SecurityEvent) {}
}

/// Structured logs plus Prometheus counters.
pub struct TelemetryDiagnostics {
    metrics: Arc<WidgetMetrics>,
}

impl TelemetryDiagnostics {
    pub fn new(metrics: Arc<WidgetMetrics>) -> Self {
        Self { metrics }
    }
}

impl Diagnostics for TelemetryDiagnostics {
    fn exchange_finished(&self, report: &ExchangeReport<'_>) {
        let outcome = report.outcome.label();
        self.metrics
            .chat_exchanges_total
            .with_label_values(&[outcome])
            .inc();
        self.metrics
            .chat_backend_duration_seconds
            .with_label_values(&[outcome])
            .observe(report.elapsed.as_secs_f64());

        match report.outcome {
            ExchangeOutcome::Succeeded => tracing::info!(
                scope = %report.scope,
                session_id = %report.session_id,
                elapsed_ms = report.elapsed.as_millis() as u64,
                "Chat exchange completed"
            ),
            ExchangeOutcome::Failed(category) => tracing::warn!(
                scope = %report.scope,
                session_id = %report.session_id,
                elapsed_ms = report.elapsed.as_millis() as u64,
                failure = category.as_str(),
                "Chat exchange failed"
            ),
        }
    }

    fn security_event(&self, event: &SecurityEvent) {
        self.record(event);
    }
}

impl SecurityEventSink for TelemetryDiagnostics {
    fn record(&self, event: &SecurityEvent) {
        self.metrics
            .security_events_total
            .with_label_values(&[event.kind.as_str()])
            .inc();
        log_event(event);
    }
}
