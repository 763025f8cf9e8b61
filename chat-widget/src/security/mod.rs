pub mod events;
pub mod sanitizer;
pub mod validator;

pub use events::{Priority, SecurityEvent, SecurityEventKind, SecurityEventSink};
pub use sanitizer::{Sanitizer, BLOCKED};
pub use validator::{InputValidator, RejectReason, Verdict};
