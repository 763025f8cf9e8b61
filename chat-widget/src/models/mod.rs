pub mod client;
pub mod message;
pub mod session;

pub use client::WidgetClient;
pub use message::{Message, Sender};
pub use session::{Session, UiAction, UiState};

use chrono::{DateTime, SubsecRound, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;

/// Current time at the millisecond precision used on disk.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Lowercase alphanumeric suffix for generated identifiers.
pub(crate) fn random_suffix(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect()
}
