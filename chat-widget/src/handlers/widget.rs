use crate::config::Locale;
use crate::error::ChatError;
use crate::models::{Message, Sender, UiAction, UiState, WidgetClient};
use crate::render::{DisplayNode, MessageView};
use crate::services::rate_limit::retry_after_secs;
use crate::services::{ChatController, ControllerRegistry, SendState, SubmitOutcome};
use crate::{AppState, ChatService};
use askama::Template;
use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Redirect, Response,
    },
    Extension, Form, Json,
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::{wrappers::BroadcastStream, Stream, StreamExt};
use widget_core::error::AppError;
use widget_core::middleware::RequestId;

const WIDGET_PATH: &str = "/widget";

/// Fixed interface strings per locale.
pub struct Labels {
    pub open: &'static str,
    pub close: &'static str,
    pub minimize: &'static str,
    pub restore: &'static str,
    pub reset: &'static str,
    pub send: &'static str,
    pub placeholder: &'static str,
    pub sending: &'static str,
    /// Shown by the script when a send fails without an inline fragment.
    pub failed: &'static str,
}

impl Labels {
    pub fn for_locale(locale: Locale) -> Self {
        match locale {
            Locale::En => Labels {
                open: "Open chat",
                close: "Close",
                minimize: "Minimize",
                restore: "Restore",
                reset: "New conversation",
                send: "Send",
                placeholder: "Type a message...",
                sending: "Waiting for a reply...",
                failed: "Oops! Something went wrong. Please try again.",
            },
            Locale::It => Labels {
                open: "Apri la chat",
                close: "Chiudi",
                minimize: "Riduci",
                restore: "Ripristina",
                reset: "Nuova conversazione",
                send: "Invia",
                placeholder: "Scrivi un messaggio...",
                sending: "In attesa di risposta...",
                failed: "Ops! Qualcosa è andato storto. Riprova.",
            },
        }
    }
}

#[derive(Template)]
#[template(path = "widget.html")]
pub struct WidgetTemplate {
    pub title: String,
    pub lang: &'static str,
    pub theme_class: &'static str,
    pub position_class: &'static str,
    pub ui: UiState,
    pub messages: Vec<MessageView>,
    pub loading: bool,
    pub max_input_length: usize,
    pub labels: Labels,
}

#[derive(Template)]
#[template(path = "config_error.html")]
pub struct ConfigErrorTemplate {
    pub title: String,
    pub lang: &'static str,
    pub message: &'static str,
    pub detail: String,
}

#[derive(Template)]
#[template(path = "partials/messages.html")]
pub struct MessagesFragment {
    pub messages: Vec<MessageView>,
}

#[derive(Template)]
#[template(path = "partials/inline_error.html")]
pub struct InlineErrorFragment {
    pub message: &'static str,
}

#[derive(Deserialize)]
pub struct SendMessageForm {
    pub message: String,
}

#[derive(Deserialize)]
pub struct UiForm {
    pub action: UiAction,
}

#[derive(Serialize)]
pub struct MessageDto {
    #[serde(flatten)]
    pub message: Message,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nodes: Option<Vec<DisplayNode>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesResponse {
    pub session_id: Option<String>,
    pub state: SendState,
    pub is_loading: bool,
    pub messages: Vec<MessageDto>,
}

fn is_htmx(headers: &HeaderMap) -> bool {
    headers.contains_key("hx-request")
}

fn lang(locale: Locale) -> &'static str {
    match locale {
        Locale::En => "en",
        Locale::It => "it",
    }
}

fn ready(state: &AppState) -> Result<&Arc<ControllerRegistry>, AppError> {
    match &state.chat {
        ChatService::Ready(registry) => Ok(registry),
        ChatService::Unconfigured(_) => Err(AppError::ServiceUnavailable),
    }
}

/// Views of the stored history, preceded by the greeting when the
/// conversation is still empty.
fn message_views(state: &AppState, messages: &[Message]) -> Vec<MessageView> {
    let mut views = Vec::with_capacity(messages.len() + 1);
    if messages.is_empty() {
        if let Some(greeting) = &state.greeting {
            views.push(MessageView::new(&Message::bot(greeting.clone()), &state.renderer));
        }
    }
    views.extend(messages.iter().map(|m| MessageView::new(m, &state.renderer)));
    views
}

fn controller_for(registry: &ControllerRegistry, client: &WidgetClient) -> Arc<ChatController> {
    registry.controller(&client.scope)
}

pub async fn widget_page(State(state): State<AppState>, client: WidgetClient) -> Response {
    let locale = state.widget.locale;
    let registry = match &state.chat {
        ChatService::Ready(registry) => registry,
        ChatService::Unconfigured(reason) => {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                ConfigErrorTemplate {
                    title: state.widget.title.clone(),
                    lang: lang(locale),
                    message: locale.not_configured(),
                    detail: reason.clone(),
                },
            )
                .into_response();
        }
    };

    let controller = controller_for(registry, &client);
    let storage = controller.storage();
    storage.get_or_create_session().await;
    let messages = storage.load_messages().await;

    WidgetTemplate {
        title: state.widget.title.clone(),
        lang: lang(locale),
        theme_class: state.widget.theme.css_class(),
        position_class: state.widget.position.css_class(),
        ui: storage.load_ui_state().await,
        messages: message_views(&state, &messages),
        loading: controller.is_loading(),
        max_input_length: state.widget.max_input_length,
        labels: Labels::for_locale(locale),
    }
    .into_response()
}

pub async fn send_message(
    State(state): State<AppState>,
    client: WidgetClient,
    headers: HeaderMap,
    request_id: Option<Extension<RequestId>>,
    Form(form): Form<SendMessageForm>,
) -> Result<Response, AppError> {
    let locale = state.widget.locale;
    let registry = match &state.chat {
        ChatService::Ready(registry) => registry,
        ChatService::Unconfigured(_) => {
            return Ok((
                StatusCode::SERVICE_UNAVAILABLE,
                InlineErrorFragment {
                    message: locale.not_configured(),
                },
            )
                .into_response());
        }
    };

    let controller = controller_for(registry, &client);
    let request_id = request_id.map(|Extension(RequestId(id))| id);

    match controller.submit(&form.message, request_id.as_deref()).await {
        Ok(SubmitOutcome::Completed(exchange)) => {
            if is_htmx(&headers) {
                let messages = vec![
                    MessageView::new(&exchange.user, &state.renderer),
                    MessageView::new(&exchange.reply, &state.renderer),
                ];
                Ok(MessagesFragment { messages }.into_response())
            } else {
                Ok(Redirect::to(WIDGET_PATH).into_response())
            }
        }
        Ok(SubmitOutcome::Busy) => Ok((
            StatusCode::CONFLICT,
            InlineErrorFragment {
                message: locale.busy(),
            },
        )
            .into_response()),
        Err(ChatError::ValidationRejected(reason)) => {
            tracing::info!(scope = %client.scope, reason = %reason, "Message rejected");
            Ok((
                StatusCode::UNPROCESSABLE_ENTITY,
                InlineErrorFragment {
                    message: locale.rejected_input(),
                },
            )
                .into_response())
        }
        Err(ChatError::RateLimited { retry_after }) => Ok((
            StatusCode::TOO_MANY_REQUESTS,
            [(header::RETRY_AFTER, retry_after_secs(retry_after).to_string())],
            InlineErrorFragment {
                message: locale.rate_limited(),
            },
        )
            .into_response()),
        Err(e) => Err(e.into()),
    }
}

pub async fn list_messages(
    State(state): State<AppState>,
    client: WidgetClient,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let registry = ready(&state)?;
    let controller = controller_for(registry, &client);
    let storage = controller.storage();
    let messages = storage.load_messages().await;

    if is_htmx(&headers) {
        return Ok(MessagesFragment {
            messages: message_views(&state, &messages),
        }
        .into_response());
    }

    let session_id = storage.session_info().await.map(|info| info.session.session_id);
    let messages = messages
        .into_iter()
        .map(|message| {
            let nodes = (message.sender == Sender::Bot && !message.is_error)
                .then(|| state.renderer.render(&message.content));
            MessageDto { message, nodes }
        })
        .collect();

    Ok(Json(MessagesResponse {
        session_id,
        state: controller.state(),
        is_loading: controller.is_loading(),
        messages,
    })
    .into_response())
}

pub async fn update_ui(
    State(state): State<AppState>,
    client: WidgetClient,
    headers: HeaderMap,
    Form(form): Form<UiForm>,
) -> Result<Response, AppError> {
    let registry = ready(&state)?;
    let storage = controller_for(registry, &client).storage().clone();

    let ui = storage.load_ui_state().await.apply(form.action);
    storage.save_ui_state(ui).await.map_err(ChatError::from)?;
    tracing::debug!(scope = %client.scope, action = ?form.action, "UI state updated");

    if is_htmx(&headers) {
        Ok(Json(ui).into_response())
    } else {
        Ok(Redirect::to(WIDGET_PATH).into_response())
    }
}

pub async fn reset(
    State(state): State<AppState>,
    client: WidgetClient,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let registry = ready(&state)?;
    let controller = controller_for(registry, &client);

    let session = controller
        .storage()
        .reset_session()
        .await
        .map_err(ChatError::from)?;
    tracing::info!(scope = %client.scope, session_id = %session.session_id, "Conversation reset");

    if is_htmx(&headers) {
        Ok(MessagesFragment {
            messages: message_views(&state, &[]),
        }
        .into_response())
    } else {
        Ok(Redirect::to(WIDGET_PATH).into_response())
    }
}

/// Storage changes for this browser, so other open tabs can refresh.
pub async fn events(
    State(state): State<AppState>,
    client: WidgetClient,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let registry = ready(&state)?;
    let scope = client.scope;

    let stream = BroadcastStream::new(registry.hub().subscribe()).filter_map(move |change| {
        match change {
            Ok(change) if change.scope == scope => Some(Ok(Event::default()
                .event("storage")
                .data(change.key.as_str()))),
            Ok(_) => None,
            Err(e) => {
                tracing::debug!(error = %e, "Storage event stream lagged");
                None
            }
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
