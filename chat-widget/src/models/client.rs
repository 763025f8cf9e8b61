use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
};
use tower_sessions::Session;
use uuid::Uuid;

const SCOPE_KEY: &str = "widget_scope";

/// The browser a request came from.
///
/// `scope` namespaces everything the widget persists for that browser, the
/// server-side stand-in for per-origin local storage. It is minted on first
/// contact and kept in the cookie session.
#[derive(Debug, Clone)]
pub struct WidgetClient {
    pub scope: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for WidgetClient
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let session = Session::from_request_parts(parts, state)
            .await
            .map_err(|_| {
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to extract session",
                )
                    .into_response()
            })?;

        let existing: Option<String> = session.get(SCOPE_KEY).await.unwrap_or(None);
        if let Some(scope) = existing {
            return Ok(WidgetClient { scope });
        }

        let scope = Uuid::new_v4().simple().to_string();
        session.insert(SCOPE_KEY, &scope).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to store widget scope");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to store session").into_response()
        })?;
        tracing::debug!(scope = %scope, "New widget client");

        Ok(WidgetClient { scope })
    }
}
