use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

const EXCERPT_CHARS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventKind {
    XssAttemptBlocked,
    EncodingAttackDetected,
    InvalidInputBlocked,
    LargePayloadBlocked,
    UrlValidationFailed,
    RateLimitExceeded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl SecurityEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityEventKind::XssAttemptBlocked => "xss_attempt_blocked",
            SecurityEventKind::EncodingAttackDetected => "encoding_attack_detected",
            SecurityEventKind::InvalidInputBlocked => "invalid_input_blocked",
            SecurityEventKind::LargePayloadBlocked => "large_payload_blocked",
            SecurityEventKind::UrlValidationFailed => "url_validation_failed",
            SecurityEventKind::RateLimitExceeded => "rate_limit_exceeded",
        }
    }

    pub fn priority(&self) -> Priority {
        match self {
            SecurityEventKind::XssAttemptBlocked => Priority::Critical,
            SecurityEventKind::EncodingAttackDetected => Priority::High,
            SecurityEventKind::UrlValidationFailed => Priority::Medium,
            SecurityEventKind::LargePayloadBlocked => Priority::Medium,
            SecurityEventKind::RateLimitExceeded => Priority::Medium,
            SecurityEventKind::InvalidInputBlocked => Priority::Low,
        }
    }
}

/// A rejected input or link. Carries a fingerprint of the offending text,
/// never the text itself.
#[derive(Debug, Clone, Serialize)]
pub struct SecurityEvent {
    pub kind: SecurityEventKind,
    pub priority: Priority,
    pub rule: Option<&'static str>,
    pub depth: usize,
    pub fingerprint: String,
    pub excerpt: String,
    pub length: usize,
    pub timestamp: DateTime<Utc>,
}

impl SecurityEvent {
    pub fn new(kind: SecurityEventKind, input: &str) -> Self {
        Self {
            kind,
            priority: kind.priority(),
            rule: None,
            depth: 0,
            fingerprint: fingerprint(input),
            excerpt: excerpt(input),
            length: input.chars().count(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_rule(mut self, rule: &'static str, depth: usize) -> Self {
        self.rule = Some(rule);
        self.depth = depth;
        self
    }
}

/// Receiver of security events. Implementations must not block.
pub trait SecurityEventSink: Send + Sync {
    fn record(&self, event: &SecurityEvent);
}

pub(crate) fn log_event(event: &SecurityEvent) {
    match event.priority {
        Priority::Critical | Priority::High => tracing::warn!(
            kind = event.kind.as_str(),
            priority = ?event.priority,
            rule = event.rule,
            depth = event.depth,
            fingerprint = %event.fingerprint,
            length = event.length,
            "Security event"
        ),
        Priority::Medium | Priority::Low => tracing::info!(
            kind = event.kind.as_str(),
            priority = ?event.priority,
            rule = event.rule,
            fingerprint = %event.fingerprint,
            length = event.length,
            "Security event"
        ),
    }
}

fn fingerprint(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(&digest[..8])
}

// Markup characters are replaced so the excerpt is inert wherever it ends up.
fn excerpt(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| match c {
            '<' | '>' | '"' | '\'' | '&' => '_',
            other => other,
        })
        .take(EXCERPT_CHARS)
        .collect()
}
