//! Persistence of the session, the message history and the panel state.
//!
//! Everything is stored as JSON under `<scope>:<key>`. Unreadable values are
//! treated as absent so a corrupt entry can never wedge a conversation.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::config::{StorageBackend, StorageSettings, WidgetSettings};
use crate::models::{self, Message, Session, UiState};
use async_trait::async_trait;
use chrono::Duration;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage quota exceeded: {needed} bytes needed, {quota} available")]
    QuotaExceeded { needed: usize, quota: usize },

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    async fn set(&self, key: &str, value: String) -> Result<(), StorageError>;
    async fn remove(&self, key: &str) -> Result<(), StorageError>;
    async fn keys(&self) -> Result<Vec<String>, StorageError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKey {
    Session,
    Messages,
    UiState,
}

impl StorageKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageKey::Session => "session",
            StorageKey::Messages => "messages",
            StorageKey::UiState => "ui_state",
        }
    }
}

/// Published after every successful write or removal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageChange {
    pub scope: String,
    pub key: StorageKey,
}

#[derive(Debug, Clone, Copy)]
pub struct StorageLimits {
    pub max_messages: usize,
    pub session_duration: Duration,
    pub conversation_timeout: Duration,
}

impl StorageLimits {
    pub fn from_settings(widget: &WidgetSettings) -> Self {
        Self {
            max_messages: widget.max_messages,
            session_duration: Duration::milliseconds(widget.session_duration_ms),
            conversation_timeout: Duration::milliseconds(widget.conversation_timeout_ms),
        }
    }
}

/// The shared backing store plus the change feed every scope publishes to.
#[derive(Clone)]
pub struct StorageHub {
    store: Arc<dyn KeyValueStore>,
    limits: StorageLimits,
    changes: broadcast::Sender<StorageChange>,
}

impl StorageHub {
    pub fn new(store: Arc<dyn KeyValueStore>, limits: StorageLimits) -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            store,
            limits,
            changes,
        }
    }

    pub fn from_settings(storage: &StorageSettings, widget: &WidgetSettings) -> Self {
        let store: Arc<dyn KeyValueStore> = match storage.backend {
            StorageBackend::Memory => match storage.quota_bytes {
                Some(quota) => Arc::new(MemoryStore::with_quota(quota)),
                None => Arc::new(MemoryStore::new()),
            },
            StorageBackend::File => Arc::new(FileStore::new(storage.path.clone())),
        };
        Self::new(store, StorageLimits::from_settings(widget))
    }

    pub fn scoped(&self, scope: impl Into<String>) -> ChatStorage {
        ChatStorage {
            hub: self.clone(),
            scope: scope.into(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }

    /// Drop every stored scope whose session is missing or expired, skipping
    /// the scopes `in_use` claims. Returns how many scopes were dropped.
    pub async fn purge_expired<F>(&self, in_use: F) -> Result<usize, StorageError>
    where
        F: Fn(&str) -> bool + Send,
    {
        let keys = self.store.keys().await?;
        let scopes: BTreeSet<String> = keys
            .iter()
            .filter_map(|key| key.rsplit_once(':'))
            .map(|(scope, _)| scope.to_string())
            .collect();

        let now = models::now();
        let mut purged = 0;
        for scope in scopes {
            if in_use(&scope) {
                continue;
            }
            let storage = self.scoped(scope);
            let live = storage
                .read_json::<Session>(StorageKey::Session)
                .await
                .is_some_and(|session| {
                    !session.is_expired(
                        now,
                        self.limits.session_duration,
                        self.limits.conversation_timeout,
                    )
                });
            if live {
                continue;
            }
            storage.clear().await?;
            tracing::debug!(scope = %storage.scope, "Purged expired scope");
            purged += 1;
        }
        Ok(purged)
    }
}

#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub session: Session,
    pub age: Duration,
    pub idle: Duration,
    pub stored_messages: usize,
    /// Serialized size of the stored history.
    pub messages_bytes: usize,
    pub ui_state: UiState,
}

/// Storage for one browser scope.
#[derive(Clone)]
pub struct ChatStorage {
    hub: StorageHub,
    scope: String,
}

impl ChatStorage {
    pub fn scope(&self) -> &str {
        &self.scope
    }

    fn key(&self, key: StorageKey) -> String {
        format!("{}:{}", self.scope, key.as_str())
    }

    fn notify(&self, key: StorageKey) {
        // No subscribers is fine.
        let _ = self.hub.changes.send(StorageChange {
            scope: self.scope.clone(),
            key,
        });
    }

    async fn read_json<T: DeserializeOwned>(&self, key: StorageKey) -> Option<T> {
        let raw = match self.hub.store.get(&self.key(key)).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(scope = %self.scope, key = key.as_str(), error = %e, "Storage read failed");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(scope = %self.scope, key = key.as_str(), error = %e, "Ignoring corrupt stored value");
                None
            }
        }
    }

    async fn write_json<T: Serialize + ?Sized>(
        &self,
        key: StorageKey,
        value: &T,
    ) -> Result<(), StorageError> {
        let raw = serde_json::to_string(value)?;
        self.hub.store.set(&self.key(key), raw).await?;
        self.notify(key);
        Ok(())
    }

    async fn remove(&self, key: StorageKey) -> Result<(), StorageError> {
        self.hub.store.remove(&self.key(key)).await?;
        self.notify(key);
        Ok(())
    }

    async fn store_session(&self, session: &Session) {
        if let Err(e) = self.write_json(StorageKey::Session, session).await {
            tracing::warn!(scope = %self.scope, error = %e, "Failed to persist session");
        }
    }

    /// Return the live session, replacing an expired or missing one.
    ///
    /// An expired session takes its message history with it. Storage
    /// failures are logged and the session is still returned.
    pub async fn get_or_create_session(&self) -> Session {
        let now = models::now();
        let limits = self.hub.limits;

        if let Some(mut session) = self.read_json::<Session>(StorageKey::Session).await {
            if !session.is_expired(now, limits.session_duration, limits.conversation_timeout) {
                session.last_activity = now;
                session.page_views += 1;
                self.store_session(&session).await;
                return session;
            }

            tracing::info!(
                scope = %self.scope,
                session_id = %session.session_id,
                "Session expired, starting a new conversation"
            );
            if let Err(e) = self.remove(StorageKey::Messages).await {
                tracing::warn!(scope = %self.scope, error = %e, "Failed to clear expired messages");
            }
        }

        let mut session = Session::new(now);
        session.page_views = 1;
        self.store_session(&session).await;
        tracing::info!(scope = %self.scope, session_id = %session.session_id, "Session created");
        session
    }

    /// Record one sent message against the session.
    pub async fn touch_session(&self) -> Session {
        let mut session = match self.read_json::<Session>(StorageKey::Session).await {
            Some(session)
                if !session.is_expired(
                    models::now(),
                    self.hub.limits.session_duration,
                    self.hub.limits.conversation_timeout,
                ) =>
            {
                session
            }
            _ => self.get_or_create_session().await,
        };
        session.last_activity = models::now();
        session.message_count += 1;
        self.store_session(&session).await;
        session
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.remove(StorageKey::Messages).await?;
        self.remove(StorageKey::UiState).await?;
        self.remove(StorageKey::Session).await
    }

    /// Drop everything stored for this scope and start a fresh session.
    pub async fn reset_session(&self) -> Result<Session, StorageError> {
        self.clear().await?;
        Ok(self.get_or_create_session().await)
    }

    /// Stored history, oldest first. Entries that do not parse as messages
    /// are dropped.
    pub async fn load_messages(&self) -> Vec<Message> {
        let Some(values) = self
            .read_json::<Vec<serde_json::Value>>(StorageKey::Messages)
            .await
        else {
            return Vec::new();
        };

        let total = values.len();
        let messages: Vec<Message> = values
            .into_iter()
            .filter_map(|v| serde_json::from_value(v).ok())
            .collect();
        if messages.len() < total {
            tracing::warn!(
                scope = %self.scope,
                dropped = total - messages.len(),
                "Dropped malformed stored messages"
            );
        }
        messages
    }

    /// Persist the most recent `max_messages` entries. When the backend
    /// reports a full quota the kept window is halved until it fits.
    /// Returns how many messages were written.
    pub async fn save_messages(&self, messages: &[Message]) -> Result<usize, StorageError> {
        let mut keep = messages.len().min(self.hub.limits.max_messages);
        loop {
            let window = &messages[messages.len() - keep..];
            match self.write_json(StorageKey::Messages, window).await {
                Ok(()) => return Ok(keep),
                Err(StorageError::QuotaExceeded { needed, quota }) if keep > 0 => {
                    tracing::warn!(
                        scope = %self.scope,
                        keep,
                        needed,
                        quota,
                        "Storage quota exceeded, trimming message history"
                    );
                    keep /= 2;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub async fn append_message(&self, message: &Message) -> Result<usize, StorageError> {
        let mut messages = self.load_messages().await;
        messages.push(message.clone());
        self.save_messages(&messages).await
    }

    pub async fn load_ui_state(&self) -> UiState {
        self.read_json(StorageKey::UiState).await.unwrap_or_default()
    }

    pub async fn save_ui_state(&self, state: UiState) -> Result<(), StorageError> {
        self.write_json(StorageKey::UiState, &state).await
    }

    pub async fn session_info(&self) -> Option<SessionInfo> {
        let session = self.read_json::<Session>(StorageKey::Session).await?;
        let messages_bytes = match self.hub.store.get(&self.key(StorageKey::Messages)).await {
            Ok(raw) => raw.map_or(0, |raw| raw.len()),
            Err(_) => 0,
        };
        let now = models::now();
        Some(SessionInfo {
            age: session.age(now),
            idle: session.idle(now),
            stored_messages: self.load_messages().await.len(),
            messages_bytes,
            ui_state: self.load_ui_state().await,
            session,
        })
    }
}
