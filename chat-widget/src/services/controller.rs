//! Send/receive workflow for one conversation.
//!
//! ```text
//! Idle -> Validating -> Rejected -> Idle
//!                    -> Sanitized -> Sending -> Succeeded -> Idle
//!                                            -> Failed    -> Idle
//! ```
//!
//! At most one exchange is in flight per controller. The return to `Idle`
//! happens in a drop guard, so it runs on every exit path including
//! cancellation of the request future. Each controller also carries the send
//! quota of its scope; a send over quota ends in `Rejected` like invalid
//! input does.

use super::chat_client::ChatBackend;
use super::diagnostics::{Diagnostics, ExchangeOutcome, ExchangeReport};
use super::rate_limit::{check_rate, RateLimit, ScopeRateLimiter};
use crate::config::Locale;
use crate::error::ChatError;
use crate::models::Message;
use crate::security::{InputValidator, Sanitizer, SecurityEvent, SecurityEventKind, Verdict};
use crate::storage::ChatStorage;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SendState {
    Idle,
    Validating,
    Rejected,
    Sanitized,
    Sending,
    Succeeded,
    Failed,
}

impl SendState {
    pub fn can_transition_to(self, next: SendState) -> bool {
        use SendState::*;
        matches!(
            (self, next),
            (Idle, Validating)
                | (Validating, Rejected)
                | (Validating, Sanitized)
                | (Sanitized, Sending)
                | (Sending, Succeeded)
                | (Sending, Failed)
                | (_, Idle)
        )
    }
}

#[derive(Debug, Clone)]
pub struct Exchange {
    pub user: Message,
    pub reply: Message,
}

impl Exchange {
    pub fn succeeded(&self) -> bool {
        !self.reply.is_error
    }
}

#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    /// Another exchange is in flight; nothing was done.
    Busy,
    Completed(Exchange),
}

/// Everything a controller needs besides its storage scope.
#[derive(Clone)]
pub struct ControllerDeps {
    pub backend: Arc<dyn ChatBackend>,
    pub validator: Arc<InputValidator>,
    pub sanitizer: Arc<Sanitizer>,
    pub diagnostics: Arc<dyn Diagnostics>,
    pub locale: Locale,
    pub timeout: Duration,
    pub rate_limit: RateLimit,
}

pub struct ChatController {
    deps: ControllerDeps,
    storage: ChatStorage,
    limiter: ScopeRateLimiter,
    in_flight: AtomicBool,
    state: watch::Sender<SendState>,
}

struct InFlightGuard<'a> {
    controller: &'a ChatController,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(controller: &'a ChatController) -> Option<Self> {
        controller
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { controller })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.controller.transition(SendState::Idle);
        self.controller.in_flight.store(false, Ordering::Release);
    }
}

impl ChatController {
    pub fn new(deps: ControllerDeps, storage: ChatStorage) -> Self {
        let (state, _) = watch::channel(SendState::Idle);
        Self {
            limiter: deps.rate_limit.limiter(),
            deps,
            storage,
            in_flight: AtomicBool::new(false),
            state,
        }
    }

    pub fn state(&self) -> SendState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SendState> {
        self.state.subscribe()
    }

    /// True while an exchange is between validation and its final state.
    pub fn is_loading(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn storage(&self) -> &ChatStorage {
        &self.storage
    }

    pub fn locale(&self) -> Locale {
        self.deps.locale
    }

    fn transition(&self, next: SendState) {
        let previous = self.state.send_replace(next);
        if previous != next && !previous.can_transition_to(next) {
            tracing::warn!(from = ?previous, to = ?next, "Unexpected send state transition");
        }
        tracing::debug!(scope = %self.storage.scope(), from = ?previous, to = ?next, "Send state");
    }

    /// Validate, sanitize, persist and relay one user message.
    ///
    /// Rejected input returns [`ChatError::ValidationRejected`] and a send
    /// over quota returns [`ChatError::RateLimited`]; both leave history
    /// untouched. Backend failures are not errors here: they end as
    /// an error bubble in the returned exchange.
    pub async fn submit(
        &self,
        raw: &str,
        request_id: Option<&str>,
    ) -> Result<SubmitOutcome, ChatError> {
        let Some(_guard) = InFlightGuard::acquire(self) else {
            tracing::debug!(scope = %self.storage.scope(), "Send ignored, exchange in flight");
            return Ok(SubmitOutcome::Busy);
        };

        self.transition(SendState::Validating);
        if let Err(retry_after) = check_rate(&self.limiter) {
            tracing::warn!(
                scope = %self.storage.scope(),
                retry_after_ms = retry_after.as_millis() as u64,
                "Send rate limit exceeded"
            );
            self.deps.diagnostics.security_event(&SecurityEvent::new(
                SecurityEventKind::RateLimitExceeded,
                raw,
            ));
            self.transition(SendState::Rejected);
            return Err(ChatError::RateLimited { retry_after });
        }

        if let Verdict::Reject(reason) = self.deps.validator.check(raw) {
            self.transition(SendState::Rejected);
            return Err(ChatError::ValidationRejected(reason));
        }

        let text = self.deps.sanitizer.sanitize(raw);
        self.transition(SendState::Sanitized);

        let session = self.storage.touch_session().await;
        let user = Message::user(text.clone());
        self.persist(&user).await;

        self.transition(SendState::Sending);
        let started = Instant::now();
        let result = match tokio::time::timeout(
            self.deps.timeout,
            self.deps.backend.send(&text, &session.session_id, request_id),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ChatError::NetworkTimeout(self.deps.timeout)),
        };
        let elapsed = started.elapsed();

        let (reply, outcome) = match result {
            Ok(reply) => {
                self.transition(SendState::Succeeded);
                let text = reply.unwrap_or_else(|| self.deps.locale.fallback_reply().to_string());
                (Message::bot(text), ExchangeOutcome::Succeeded)
            }
            Err(err) => {
                let category = err.category();
                tracing::warn!(
                    scope = %self.storage.scope(),
                    error = %err,
                    failure = category.as_str(),
                    "Chat API call failed"
                );
                self.transition(SendState::Failed);
                (
                    Message::bot_error(category.user_message(self.deps.locale)),
                    ExchangeOutcome::Failed(category),
                )
            }
        };

        self.deps.diagnostics.exchange_finished(&ExchangeReport {
            scope: self.storage.scope(),
            session_id: &session.session_id,
            outcome,
            elapsed,
        });
        self.persist(&reply).await;

        Ok(SubmitOutcome::Completed(Exchange { user, reply }))
    }

    /// History is best effort; a storage failure never fails the exchange.
    async fn persist(&self, message: &Message) {
        if let Err(e) = self.storage.append_message(message).await {
            tracing::error!(scope = %self.storage.scope(), error = %e, "Failed to persist message");
        }
    }
}
