use super::validator::{strip_controls, InputValidator};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

/// Output for any input the validator rejects.
pub const BLOCKED: &str = "[BLOCKED]";

const TAG_REMOVED: &str = "[TAG REMOVED]";
const ENTITY_REMOVED: &str = "[ENTITY REMOVED]";
const PROTOCOL_BLOCKED: &str = "[PROTOCOL BLOCKED]";
const EVENT_BLOCKED: &str = "[EVENT BLOCKED]";

static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));
static ENTITY: Lazy<Regex> = Lazy::new(|| Regex::new(r"&[a-zA-Z0-9#]+;").expect("valid regex"));
static PROTOCOL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:java|vb|live)script\s*:|\bdata\s*:\s*(?:[a-z]+/|[,;])")
        .expect("valid regex")
});
static EVENT_HANDLER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bon\w+\s*=").expect("valid regex"));

/// Turns accepted input into inert display text.
///
/// `sanitize` is total and idempotent: its output always passes the
/// validator again and a second pass leaves it unchanged.
pub struct Sanitizer {
    validator: Arc<InputValidator>,
}

impl Sanitizer {
    pub fn new(validator: Arc<InputValidator>) -> Self {
        Self { validator }
    }

    pub fn validator(&self) -> &InputValidator {
        &self.validator
    }

    pub fn sanitize(&self, raw: &str) -> String {
        // Removing control characters can join a hidden pattern, so the
        // validator sees the stripped text.
        let text = strip_controls(raw);
        if !self.validator.validate(&text) {
            return BLOCKED.to_string();
        }

        let text = TAG.replace_all(&text, TAG_REMOVED);
        let text = ENTITY.replace_all(&text, ENTITY_REMOVED);
        let text = PROTOCOL.replace_all(&text, PROTOCOL_BLOCKED);
        let text = EVENT_HANDLER.replace_all(&text, EVENT_BLOCKED);

        let truncated: String = text
            .trim()
            .chars()
            .take(self.validator.max_length())
            .collect();
        let output = truncated.trim_end();
        if output.is_empty() || !self.validator.validate(output) {
            return BLOCKED.to_string();
        }
        output.to_string()
    }
}
