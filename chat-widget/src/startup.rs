//! Application assembly and server lifecycle.

use crate::config::Settings;
use crate::handlers::{
    app::health_check,
    metrics::metrics,
    widget::{events, list_messages, reset, send_message, update_ui, widget_page},
};
use crate::render::MarkdownRenderer;
use crate::security::{InputValidator, Sanitizer, SecurityEventSink, BLOCKED};
use crate::services::{
    metrics::track_http, registry::spawn_sweeper, ControllerDeps, ControllerRegistry,
    HttpChatClient, RateLimit, TelemetryDiagnostics, WidgetMetrics,
};
use crate::storage::StorageHub;
use crate::{AppState, ChatService};
use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use std::path::PathBuf;
use std::sync::Arc;
use time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tower_sessions::{Expiry, MemoryStore, SessionManagerLayer};
use widget_core::error::AppError;
use widget_core::middleware::{request_id_middleware, security_headers_middleware};
use widget_core::observability::REQUEST_ID_HEADER;

/// Wire the validator, storage, client and controllers from settings.
///
/// An unusable `api_url` does not fail the build: the state carries the
/// reason and the widget page reports it.
pub fn build_state(settings: &Settings) -> Result<AppState, AppError> {
    let widget = &settings.widget;
    let metrics = Arc::new(
        WidgetMetrics::new().map_err(|e| AppError::InternalError(e.into()))?,
    );
    let telemetry = Arc::new(TelemetryDiagnostics::new(metrics.clone()));
    let sink: Arc<dyn SecurityEventSink> = telemetry.clone();

    let validator = Arc::new(
        InputValidator::new(widget.max_input_length, widget.decode_depth)
            .with_event_sink(sink.clone()),
    );
    let sanitizer = Arc::new(Sanitizer::new(validator.clone()));
    let renderer = MarkdownRenderer::new().with_event_sink(sink);

    let greeting = widget
        .initial_message
        .as_deref()
        .map(|text| sanitizer.sanitize(text))
        .filter(|text| {
            let usable = text != BLOCKED;
            if !usable {
                tracing::warn!("initial_message was rejected and will not be shown");
            }
            usable
        });

    let chat = match widget.check() {
        Ok(endpoint) => {
            tracing::info!(endpoint = %endpoint, "Chat API configured");
            let backend = Arc::new(HttpChatClient::new(endpoint, widget.request_timeout()));
            let deps = ControllerDeps {
                backend,
                validator,
                sanitizer,
                diagnostics: telemetry,
                locale: widget.locale,
                timeout: widget.request_timeout(),
                rate_limit: RateLimit {
                    requests: widget.rate_limit_requests,
                    window: widget.rate_limit_window(),
                },
            };
            let hub = StorageHub::from_settings(&settings.storage, widget);
            ChatService::Ready(Arc::new(ControllerRegistry::new(deps, hub)))
        }
        Err(e) => {
            tracing::error!(error = %e, "Chat widget is not configured");
            ChatService::Unconfigured(e.to_string())
        }
    };

    Ok(AppState {
        widget: Arc::new(widget.clone()),
        chat,
        metrics,
        renderer,
        greeting,
    })
}

fn static_dir() -> PathBuf {
    let local = PathBuf::from("static");
    if local.is_dir() {
        local
    } else {
        PathBuf::from("chat-widget").join("static")
    }
}

pub fn build_router(state: AppState, secure_cookie: bool) -> Router {
    let session_layer = SessionManagerLayer::new(MemoryStore::default())
        .with_secure(secure_cookie)
        .with_expiry(Expiry::OnInactivity(Duration::days(7)));

    Router::new()
        .route("/", get(widget_page))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .route("/widget", get(widget_page))
        .route("/widget/messages", get(list_messages).post(send_message))
        .route("/widget/ui", post(update_ui))
        .route("/widget/reset", post(reset))
        .route("/widget/events", get(events))
        .nest_service("/static", ServeDir::new(static_dir()))
        .layer(session_layer)
        .layer(from_fn(security_headers_middleware))
        .layer(from_fn_with_state(state.metrics.clone(), track_http))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            }),
        )
        .layer(from_fn(request_id_middleware))
        .with_state(state)
}

/// Bound listener plus router, ready to serve.
pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
    sweeper: Option<JoinHandle<()>>,
}

impl Application {
    pub async fn build(settings: Settings) -> Result<Self, AppError> {
        let state = build_state(&settings)?;
        let sweeper = match &state.chat {
            ChatService::Ready(registry) => Some(spawn_sweeper(
                registry.clone(),
                settings.storage.sweep_interval(),
                settings.storage.idle_scope(),
            )),
            ChatService::Unconfigured(_) => None,
        };
        let router = build_router(state, settings.widget.secure_cookie);

        let address = settings.server.address();
        let listener = TcpListener::bind(&address).await.map_err(|e| {
            tracing::error!("Failed to bind TCP listener to {}: {}", address, e);
            AppError::InternalError(anyhow::anyhow!("Failed to bind to {}: {}", address, e))
        })?;
        let port = listener.local_addr()?.port();

        Ok(Self {
            port,
            listener,
            router,
            sweeper,
        })
    }

    /// Port the server is listening on (useful with port 0 in tests).
    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let result = axum::serve(self.listener, self.router).await;
        if let Some(sweeper) = self.sweeper {
            sweeper.abort();
        }
        result
    }
}
