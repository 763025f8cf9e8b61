use crate::error::ChatError;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;
use validator::Validate;
use widget_core::config::{self as core_config, ServerConfig};
use widget_core::error::AppError;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub widget: WidgetSettings,
    #[serde(default)]
    pub storage: StorageSettings,
}

/// Host-provided widget configuration.
#[derive(Debug, Deserialize, Clone, Validate)]
pub struct WidgetSettings {
    /// Remote chat endpoint. Required; the widget refuses to start a chat without it.
    #[serde(default)]
    #[validate(url(message = "api_url must be an absolute URL"))]
    pub api_url: Option<String>,
    #[serde(default)]
    pub theme: Theme,
    #[serde(default)]
    pub position: Position,
    /// Greeting shown as the first bot bubble of an empty conversation.
    #[serde(default)]
    pub initial_message: Option<String>,
    #[serde(default)]
    pub locale: Locale,
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default = "default_request_timeout_ms")]
    #[validate(range(min = 100, max = 120000))]
    pub request_timeout_ms: u64,
    #[serde(default = "default_max_input_length")]
    #[validate(range(min = 1, max = 10000))]
    pub max_input_length: usize,
    #[serde(default = "default_max_messages")]
    #[validate(range(min = 1, max = 10000))]
    pub max_messages: usize,
    #[serde(default = "default_session_duration_ms")]
    #[validate(range(min = 1000))]
    pub session_duration_ms: i64,
    #[serde(default = "default_conversation_timeout_ms")]
    #[validate(range(min = 1000))]
    pub conversation_timeout_ms: i64,
    /// Upper bound on HTML-entity decoding passes during validation.
    #[serde(default = "default_decode_depth")]
    #[validate(range(min = 1, max = 16))]
    pub decode_depth: usize,
    /// Messages one scope may send per `rate_limit_window_secs`.
    #[serde(default = "default_rate_limit_requests")]
    #[validate(range(min = 1, max = 1000))]
    pub rate_limit_requests: u32,
    #[serde(default = "default_rate_limit_window_secs")]
    #[validate(range(min = 1, max = 3600))]
    pub rate_limit_window_secs: u64,
    #[serde(default)]
    pub secure_cookie: bool,
}

impl Default for WidgetSettings {
    fn default() -> Self {
        Self {
            api_url: None,
            theme: Theme::default(),
            position: Position::default(),
            initial_message: None,
            locale: Locale::default(),
            title: default_title(),
            request_timeout_ms: default_request_timeout_ms(),
            max_input_length: default_max_input_length(),
            max_messages: default_max_messages(),
            session_duration_ms: default_session_duration_ms(),
            conversation_timeout_ms: default_conversation_timeout_ms(),
            decode_depth: default_decode_depth(),
            rate_limit_requests: default_rate_limit_requests(),
            rate_limit_window_secs: default_rate_limit_window_secs(),
            secure_cookie: false,
        }
    }
}

fn default_title() -> String {
    "Chat".to_string()
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_max_input_length() -> usize {
    1000
}

fn default_max_messages() -> usize {
    100
}

fn default_session_duration_ms() -> i64 {
    7 * DAY_MS
}

fn default_conversation_timeout_ms() -> i64 {
    DAY_MS
}

fn default_decode_depth() -> usize {
    5
}

fn default_rate_limit_requests() -> u32 {
    10
}

fn default_rate_limit_window_secs() -> u64 {
    60
}

impl WidgetSettings {
    /// Resolve the chat endpoint, or explain why the widget cannot run.
    ///
    /// A missing or non-http(s) `api_url` is fatal for the chat, never retried.
    pub fn check(&self) -> Result<Url, ChatError> {
        self.validate()
            .map_err(|e| ChatError::Configuration(e.to_string()))?;

        let raw = self
            .api_url
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ChatError::Configuration("api_url is not configured".to_string()))?;

        let url = Url::parse(raw)
            .map_err(|e| ChatError::Configuration(format!("api_url is invalid: {}", e)))?;

        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(ChatError::Configuration(format!(
                "api_url must use http or https, got '{}'",
                other
            ))),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    pub fn css_class(&self) -> &'static str {
        match self {
            Theme::Light => "theme-light",
            Theme::Dark => "theme-dark",
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Position {
    BottomLeft,
    #[default]
    BottomRight,
}

impl Position {
    pub fn css_class(&self) -> &'static str {
        match self {
            Position::BottomLeft => "pos-bottom-left",
            Position::BottomRight => "pos-bottom-right",
        }
    }
}

/// Language of every user-facing string the widget produces.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    En,
    It,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    File,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageSettings {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
    /// Byte budget of the memory backend, mimicking a browser storage quota.
    #[serde(default)]
    pub quota_bytes: Option<usize>,
    /// How often idle controllers and expired scopes are swept.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// A controller unused for this long is dropped from memory.
    #[serde(default = "default_idle_scope_secs")]
    pub idle_scope_secs: u64,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            path: default_storage_path(),
            quota_bytes: None,
            sweep_interval_secs: default_sweep_interval_secs(),
            idle_scope_secs: default_idle_scope_secs(),
        }
    }
}

impl StorageSettings {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn idle_scope(&self) -> Duration {
        Duration::from_secs(self.idle_scope_secs)
    }
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("data/chat-widget")
}

fn default_sweep_interval_secs() -> u64 {
    300
}

fn default_idle_scope_secs() -> u64 {
    1800
}

impl Settings {
    /// Read `config/base.yaml` (from the crate or the workspace root) and
    /// apply `APP_*` overrides.
    pub fn load() -> Result<Self, AppError> {
        let base_path = std::env::current_dir()?;

        let configuration_directory = if base_path.ends_with("chat-widget") {
            base_path.join("config")
        } else {
            base_path.join("chat-widget").join("config")
        };

        core_config::load(&configuration_directory.join("base.yaml"))
    }
}
