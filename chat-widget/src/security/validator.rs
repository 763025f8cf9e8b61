//! Deny-list validation of user input.
//!
//! Patterns are matched case-insensitively against the raw text and against
//! every HTML-entity decoding of it, so `&amp;lt;script&amp;gt;` is caught at
//! the second decoding layer. Some rules flag an encoded form itself, which
//! covers legacy entities without a trailing semicolon (`&ltscript`) that
//! browsers decode but the entity decoder leaves alone.
//!
//! Control characters are dropped before matching, the same way the
//! sanitizer drops them, so they cannot split a pattern.

use super::events::{SecurityEvent, SecurityEventKind, SecurityEventSink};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::sync::Arc;

struct DenyRule {
    name: &'static str,
    pattern: Regex,
    /// Matches an entity-encoded payload rather than live markup.
    encoded_form: bool,
}

impl DenyRule {
    fn new(name: &'static str, pattern: &str, encoded_form: bool) -> Self {
        Self {
            name,
            pattern: Regex::new(pattern).expect("valid regex"),
            encoded_form,
        }
    }
}

static DENY_LIST: Lazy<Vec<DenyRule>> = Lazy::new(|| {
    vec![
        DenyRule::new("script_tag", r"(?i)<\s*/?\s*script", false),
        DenyRule::new("frame_tag", r"(?i)<\s*/?\s*i?frame", false),
        DenyRule::new("object_tag", r"(?i)<\s*/?\s*object\b", false),
        DenyRule::new("embed_tag", r"(?i)<\s*/?\s*embed\b", false),
        DenyRule::new("event_handler", r"(?i)\bon\w+\s*=", false),
        DenyRule::new("javascript_scheme", r"(?i)javascript\s*:", false),
        DenyRule::new("vbscript_scheme", r"(?i)vbscript\s*:", false),
        DenyRule::new("livescript_scheme", r"(?i)livescript\s*:", false),
        DenyRule::new("data_uri", r"(?i)\bdata\s*:\s*(?:[a-z]+/|[,;])", false),
        DenyRule::new(
            "encoded_tag",
            r"(?i)&(?:lt|#0*60|#x0*3c);?\s*/?\s*(?:script|i?frame|object|embed)",
            true,
        ),
        DenyRule::new(
            "double_encoded_bracket",
            r"(?i)&amp;(?:lt|gt|#0*60|#0*62|#x0*3c|#x0*3e)(?:;|\s*/?\s*[a-z])",
            true,
        ),
    ]
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Nothing but whitespace or control characters.
    Empty,
    TooLong { length: usize, max: usize },
    /// A deny-list rule matched at the given decoding depth (0 = raw).
    Pattern { rule: &'static str, depth: usize },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Empty => write!(f, "empty input"),
            RejectReason::TooLong { length, max } => {
                write!(f, "input of {} characters exceeds {}", length, max)
            }
            RejectReason::Pattern { rule, depth } => {
                write!(f, "matched rule '{}' at decoding depth {}", rule, depth)
            }
        }
    }
}

impl RejectReason {
    fn event_kind(&self) -> SecurityEventKind {
        match self {
            RejectReason::Empty => SecurityEventKind::InvalidInputBlocked,
            RejectReason::TooLong { .. } => SecurityEventKind::LargePayloadBlocked,
            RejectReason::Pattern { rule, depth } => {
                let encoded_form = DENY_LIST.iter().any(|r| r.name == *rule && r.encoded_form);
                if *depth > 0 || encoded_form {
                    SecurityEventKind::EncodingAttackDetected
                } else {
                    SecurityEventKind::XssAttemptBlocked
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject(RejectReason),
}

impl Verdict {
    pub fn is_accept(&self) -> bool {
        matches!(self, Verdict::Accept)
    }
}

pub struct InputValidator {
    max_length: usize,
    decode_depth: usize,
    sink: Option<Arc<dyn SecurityEventSink>>,
}

impl InputValidator {
    pub fn new(max_length: usize, decode_depth: usize) -> Self {
        Self {
            max_length,
            decode_depth,
            sink: None,
        }
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn SecurityEventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    pub fn validate(&self, raw: &str) -> bool {
        self.check(raw).is_accept()
    }

    /// Like [`validate`](Self::validate) but says why, and reports rejections
    /// to the event sink.
    pub fn check(&self, raw: &str) -> Verdict {
        let verdict = self.evaluate(raw);
        if let (Verdict::Reject(reason), Some(sink)) = (&verdict, &self.sink) {
            let event = SecurityEvent::new(reason.event_kind(), raw);
            let event = match reason {
                RejectReason::Pattern { rule, depth } => event.with_rule(*rule, *depth),
                _ => event,
            };
            sink.record(&event);
        }
        verdict
    }

    fn evaluate(&self, raw: &str) -> Verdict {
        if raw.chars().all(|c| c.is_whitespace() || c.is_control()) {
            return Verdict::Reject(RejectReason::Empty);
        }

        let length = raw.chars().count();
        if length > self.max_length {
            return Verdict::Reject(RejectReason::TooLong {
                length,
                max: self.max_length,
            });
        }

        let visible = strip_controls(raw);
        for (depth, layer) in decoded_layers(&visible, self.decode_depth).iter().enumerate() {
            for rule in DENY_LIST.iter() {
                if rule.pattern.is_match(layer) {
                    return Verdict::Reject(RejectReason::Pattern {
                        rule: rule.name,
                        depth,
                    });
                }
            }
        }

        Verdict::Accept
    }
}

/// Drop control characters other than newline and tab.
pub(crate) fn strip_controls(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect()
}

/// The raw text followed by each successive entity decoding, stopping at
/// `max_depth` passes or as soon as decoding changes nothing.
pub fn decoded_layers(raw: &str, max_depth: usize) -> Vec<String> {
    let mut layers = vec![raw.to_string()];
    for _ in 0..max_depth {
        let Some(last) = layers.last() else { break };
        let next = html_escape::decode_html_entities(last).into_owned();
        if &next == last {
            break;
        }
        layers.push(next);
    }
    layers
}
