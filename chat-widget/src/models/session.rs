use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Conversation identity. `session_id` doubles as the API `thread_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_activity: DateTime<Utc>,
    #[serde(default)]
    pub message_count: u64,
    #[serde(default)]
    pub page_views: u64,
}

impl Session {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            session_id: format!(
                "session_{}_{}",
                now.timestamp_millis(),
                super::random_suffix(9)
            ),
            created: now,
            last_activity: now,
            message_count: 0,
            page_views: 0,
        }
    }

    /// A session dies when it is older than `max_age` or idle longer than
    /// `max_idle`, whichever comes first.
    pub fn is_expired(&self, now: DateTime<Utc>, max_age: Duration, max_idle: Duration) -> bool {
        now - self.created > max_age || now - self.last_activity > max_idle
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.created
    }

    pub fn idle(&self, now: DateTime<Utc>) -> Duration {
        now - self.last_activity
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiState {
    #[serde(default)]
    pub is_open: bool,
    #[serde(default)]
    pub is_minimized: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UiAction {
    Open,
    Close,
    Minimize,
    Restore,
}

impl UiState {
    pub fn apply(self, action: UiAction) -> Self {
        match action {
            UiAction::Open => UiState {
                is_open: true,
                is_minimized: false,
            },
            UiAction::Close => UiState::default(),
            UiAction::Minimize => UiState {
                is_open: true,
                is_minimized: true,
            },
            UiAction::Restore => UiState {
                is_open: true,
                is_minimized: false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_format() {
        let now = Utc::now();
        let session = Session::new(now);
        let suffix = session
            .session_id
            .strip_prefix(&format!("session_{}_", now.timestamp_millis()))
            .unwrap();
        assert_eq!(suffix.len(), 9);
        assert!(suffix.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn expiry_by_age_or_idleness() {
        let start = Utc::now();
        let mut session = Session::new(start);
        let week = Duration::days(7);
        let day = Duration::days(1);

        assert!(!session.is_expired(start + Duration::hours(23), week, day));
        assert!(session.is_expired(start + Duration::hours(25), week, day));

        session.last_activity = start + Duration::days(7);
        assert!(!session.is_expired(start + Duration::days(7), week, day));
        assert!(session.is_expired(start + Duration::days(7) + Duration::minutes(1), week, day));
    }

    #[test]
    fn ui_actions() {
        let open = UiState::default().apply(UiAction::Open);
        assert!(open.is_open && !open.is_minimized);
        let min = open.apply(UiAction::Minimize);
        assert!(min.is_open && min.is_minimized);
        assert_eq!(min.apply(UiAction::Restore), open);
        assert_eq!(min.apply(UiAction::Close), UiState::default());
    }
}
