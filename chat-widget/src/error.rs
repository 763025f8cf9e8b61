use crate::config::Locale;
use crate::security::validator::RejectReason;
use crate::services::rate_limit::retry_after_secs;
use crate::storage::StorageError;
use std::time::Duration;
use thiserror::Error;
use widget_core::error::AppError;

/// Failures of a single chat exchange.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("input rejected: {0}")]
    ValidationRejected(RejectReason),

    #[error("send rate limit exceeded, retry in {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("chat API did not answer within {0:?}")]
    NetworkTimeout(Duration),

    #[error("network error: {0}")]
    Network(String),

    #[error("chat API returned HTTP {status}")]
    Http { status: u16, body: String },

    #[error("malformed chat API response: {0}")]
    MalformedResponse(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Coarse classification of a failed exchange, used for the bot error
/// bubble and the failure metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCategory {
    Timeout,
    Network,
    Forbidden,
    NotFound,
    ServerError,
    HttpStatus(u16),
    MalformedResponse,
    Unexpected,
}

impl ChatError {
    pub fn category(&self) -> FailureCategory {
        match self {
            ChatError::NetworkTimeout(_) => FailureCategory::Timeout,
            ChatError::Network(_) => FailureCategory::Network,
            ChatError::Http { status: 403, .. } => FailureCategory::Forbidden,
            ChatError::Http { status: 404, .. } => FailureCategory::NotFound,
            ChatError::Http { status: 500, .. } => FailureCategory::ServerError,
            ChatError::Http { status, .. } => FailureCategory::HttpStatus(*status),
            ChatError::MalformedResponse(_) => FailureCategory::MalformedResponse,
            ChatError::ValidationRejected(_)
            | ChatError::RateLimited { .. }
            | ChatError::Configuration(_)
            | ChatError::Storage(_) => FailureCategory::Unexpected,
        }
    }
}

impl FailureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCategory::Timeout => "timeout",
            FailureCategory::Network => "network",
            FailureCategory::Forbidden => "forbidden",
            FailureCategory::NotFound => "not_found",
            FailureCategory::ServerError => "server_error",
            FailureCategory::HttpStatus(_) => "http_status",
            FailureCategory::MalformedResponse => "malformed_response",
            FailureCategory::Unexpected => "unexpected",
        }
    }

    pub fn user_message(&self, locale: Locale) -> String {
        match (locale, self) {
            (Locale::En, FailureCategory::Timeout) => {
                "Timeout: the request took too long. The server may be slow.".to_string()
            }
            (Locale::En, FailureCategory::Network) => {
                "Network error: check your connection and the API URL.".to_string()
            }
            (Locale::En, FailureCategory::Forbidden) => {
                "Access denied (403). Authentication problem.".to_string()
            }
            (Locale::En, FailureCategory::NotFound) => {
                "Endpoint not found (404). Check the API URL in the settings.".to_string()
            }
            (Locale::En, FailureCategory::ServerError) => {
                "Internal server error (500). The backend has a problem.".to_string()
            }
            (Locale::En, FailureCategory::HttpStatus(status)) => {
                format!("Server error (HTTP {}).", status)
            }
            (Locale::En, FailureCategory::MalformedResponse) => {
                "The server returned an invalid (non-JSON) response.".to_string()
            }
            (Locale::En, FailureCategory::Unexpected) => {
                "Oops! Something went wrong. Please try again.".to_string()
            }
            (Locale::It, FailureCategory::Timeout) => {
                "Timeout: la richiesta ha impiegato troppo tempo. Il server potrebbe essere lento."
                    .to_string()
            }
            (Locale::It, FailureCategory::Network) => {
                "Errore di rete: verifica la connessione e l'URL API.".to_string()
            }
            (Locale::It, FailureCategory::Forbidden) => {
                "Accesso negato (403). Problema di autenticazione.".to_string()
            }
            (Locale::It, FailureCategory::NotFound) => {
                "Endpoint non trovato (404). Verifica l'URL API nelle impostazioni.".to_string()
            }
            (Locale::It, FailureCategory::ServerError) => {
                "Errore interno del server (500). Il backend ha un problema.".to_string()
            }
            (Locale::It, FailureCategory::HttpStatus(status)) => {
                format!("Errore server (HTTP {}).", status)
            }
            (Locale::It, FailureCategory::MalformedResponse) => {
                "Il server ha restituito una risposta non valida (non JSON).".to_string()
            }
            (Locale::It, FailureCategory::Unexpected) => {
                "Ops! Qualcosa è andato storto. Riprova.".to_string()
            }
        }
    }
}

impl Locale {
    /// Bot text used when the API answered without a reply field.
    pub fn fallback_reply(&self) -> &'static str {
        match self {
            Locale::En => "Sorry, I did not receive a valid response.",
            Locale::It => "Mi dispiace, non ho ricevuto una risposta valida.",
        }
    }

    pub fn rejected_input(&self) -> &'static str {
        match self {
            Locale::En => "This message cannot be sent. Please rephrase it.",
            Locale::It => "Questo messaggio non può essere inviato. Riformulalo.",
        }
    }

    pub fn busy(&self) -> &'static str {
        match self {
            Locale::En => "Please wait for the current reply.",
            Locale::It => "Attendi la risposta in corso.",
        }
    }

    pub fn rate_limited(&self) -> &'static str {
        match self {
            Locale::En => "You are sending messages too quickly. Please wait a moment.",
            Locale::It => "Stai inviando messaggi troppo velocemente. Attendi un momento.",
        }
    }

    pub fn not_configured(&self) -> &'static str {
        match self {
            Locale::En => "The chat is not configured: the API URL is missing or invalid.",
            Locale::It => "La chat non è configurata: l'URL API è mancante o non valido.",
        }
    }
}

impl From<ChatError> for AppError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::ValidationRejected(reason) => {
                AppError::BadRequest(anyhow::anyhow!("input rejected: {}", reason))
            }
            ChatError::RateLimited { retry_after } => AppError::TooManyRequests(
                "Too many messages. Please try again later.".to_string(),
                Some(retry_after_secs(retry_after)),
            ),
            ChatError::NetworkTimeout(_) => AppError::GatewayTimeout,
            ChatError::Network(msg) => AppError::BadGateway(msg),
            ChatError::Http { status, .. } => {
                AppError::BadGateway(format!("chat API returned HTTP {}", status))
            }
            ChatError::MalformedResponse(msg) => AppError::BadGateway(msg),
            ChatError::Configuration(msg) => AppError::ConfigError(anyhow::anyhow!(msg)),
            ChatError::Storage(e) => AppError::StorageError(anyhow::Error::new(e)),
        }
    }
}
