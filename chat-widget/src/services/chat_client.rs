use crate::error::ChatError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use url::Url;
use widget_core::observability::TracedClientExt;

const MAX_ERROR_BODY: usize = 512;

/// The remote conversational backend.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Relay one user message. `Ok(None)` means the API answered but
    /// carried no reply text.
    async fn send(
        &self,
        message: &str,
        thread_id: &str,
        request_id: Option<&str>,
    ) -> Result<Option<String>, ChatError>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    message: &'a str,
    thread_id: &'a str,
}

/// JSON-over-HTTP client for `POST {api_url}`.
pub struct HttpChatClient {
    client: Client,
    endpoint: Url,
    timeout: Duration,
}

impl HttpChatClient {
    pub fn new(endpoint: Url, timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            endpoint,
            timeout,
        }
    }

    fn classify(&self, err: reqwest::Error) -> ChatError {
        if err.is_timeout() {
            ChatError::NetworkTimeout(self.timeout)
        } else if err.is_decode() {
            ChatError::MalformedResponse(err.to_string())
        } else {
            ChatError::Network(err.to_string())
        }
    }
}

#[async_trait]
impl ChatBackend for HttpChatClient {
    async fn send(
        &self,
        message: &str,
        thread_id: &str,
        request_id: Option<&str>,
    ) -> Result<Option<String>, ChatError> {
        let mut request = self
            .client
            .traced_post(self.endpoint.as_str())
            .json(&ChatRequest { message, thread_id })
            .timeout(self.timeout);
        if let Some(id) = request_id {
            request = request.request_id(id);
        }

        let response = request.send().await.map_err(|e| {
            tracing::error!(endpoint = %self.endpoint, error = %e, "Chat API request failed");
            self.classify(e)
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body: String = body.chars().take(MAX_ERROR_BODY).collect();
            tracing::warn!(
                endpoint = %self.endpoint,
                status = status.as_u16(),
                body = %body,
                "Chat API returned an error status"
            );
            return Err(ChatError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await.map_err(|e| self.classify(e))?;
        reply_text(&body)
    }
}

/// Pull the reply out of a response body: `response` wins over `message`,
/// and blank values count as missing.
fn reply_text(body: &str) -> Result<Option<String>, ChatError> {
    let value: Value =
        serde_json::from_str(body).map_err(|e| ChatError::MalformedResponse(e.to_string()))?;

    Ok(["response", "message"]
        .iter()
        .filter_map(|field| value.get(field).and_then(Value::as_str))
        .find(|text| !text.trim().is_empty())
        .map(str::to_string))
}
