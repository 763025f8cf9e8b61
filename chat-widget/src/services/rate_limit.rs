use governor::{
    clock::{Clock, DefaultClock},
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub requests: u32,
    pub window: Duration,
}

/// Send quota of a single browser scope.
pub type ScopeRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Allow `requests` sends per `window`, all of them available as a burst.
pub fn create_scope_rate_limiter(requests: u32, window: Duration) -> ScopeRateLimiter {
    let burst = NonZeroU32::new(requests).unwrap_or(NonZeroU32::MIN);
    let quota = Quota::with_period(window / burst.get())
        .unwrap_or_else(|| Quota::per_minute(burst))
        .allow_burst(burst);

    RateLimiter::direct(quota)
}

impl RateLimit {
    pub fn limiter(&self) -> ScopeRateLimiter {
        create_scope_rate_limiter(self.requests, self.window)
    }
}

/// Whole seconds for a `Retry-After` header, never zero.
pub fn retry_after_secs(wait: Duration) -> u64 {
    wait.as_secs_f64().ceil().max(1.0) as u64
}

/// `Err` carries how long until the next send is admitted.
pub fn check_rate(limiter: &ScopeRateLimiter) -> Result<(), Duration> {
    limiter
        .check()
        .map_err(|not_until| not_until.wait_time_from(DefaultClock::default().now()))
}
