pub mod chat_client;
pub mod controller;
pub mod diagnostics;
pub mod metrics;
pub mod rate_limit;
pub mod registry;

pub use chat_client::{ChatBackend, HttpChatClient};
pub use controller::{ChatController, ControllerDeps, Exchange, SendState, SubmitOutcome};
pub use diagnostics::{Diagnostics, ExchangeOutcome, ExchangeReport, TelemetryDiagnostics};
pub use metrics::WidgetMetrics;
pub use rate_limit::RateLimit;
pub use registry::{ControllerRegistry, SweepReport};
