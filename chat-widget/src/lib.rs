pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod render;
pub mod security;
pub mod services;
pub mod startup;
pub mod storage;

use config::WidgetSettings;
use render::MarkdownRenderer;
use services::{ControllerRegistry, WidgetMetrics};
use std::sync::Arc;

/// Whether the chat can run. A bad `api_url` leaves the server up but the
/// widget shows a configuration error instead of the conversation.
#[derive(Clone)]
pub enum ChatService {
    Ready(Arc<ControllerRegistry>),
    Unconfigured(String),
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub widget: Arc<WidgetSettings>,
    pub chat: ChatService,
    pub metrics: Arc<WidgetMetrics>,
    pub renderer: MarkdownRenderer,
    /// Sanitized `initial_message`, shown above an empty conversation.
    pub greeting: Option<String>,
}
