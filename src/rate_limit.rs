//! Per-source request rate limiting

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Rate limit for one upstream source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    /// Maximum number of requests per window
    pub max_requests: u32,
    /// Window length in milliseconds
    pub window_ms: u64,
    /// Minimum spacing between two consecutive requests in milliseconds
    #[serde(default)]
    pub min_interval_ms: u64,
}

impl RateLimit {
    /// Create a new rate limit
    pub fn new(max_requests: u32, window: Duration, min_interval: Duration) -> Self {
        Self {
            max_requests,
            window_ms: u64::try_from(window.as_millis()).unwrap_or(u64::MAX),
            min_interval_ms: u64::try_from(min_interval.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// A limit that never blocks
    pub fn unlimited() -> Self {
        Self {
            max_requests: 0,
            window_ms: 0,
            min_interval_ms: 0,
        }
    }

    /// Window length
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// Minimum inter-request interval
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    /// Validate the limit
    pub fn validate(&self) -> Result<(), String> {
        if self.max_requests > 0 && self.window_ms == 0 {
            return Err("rate limit window must be greater than 0".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct LimiterState {
    last: Option<Instant>,
    window: VecDeque<Instant>,
}

/// Interval and window gate shared by all callers of one source
///
/// `max_requests == 0` disables the window ceiling. Waiters are served in
/// the order they called [`RateLimiter::acquire`]: the state lock is a fair
/// tokio mutex and a waiter keeps it while sleeping for its slot.
#[derive(Debug)]
pub struct RateLimiter {
    limit: RateLimit,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    /// Create a limiter for the given limit
    pub fn new(limit: RateLimit) -> Self {
        Self {
            limit,
            state: Mutex::new(LimiterState::default()),
        }
    }

    /// The configured limit
    pub fn limit(&self) -> RateLimit {
        self.limit
    }

    /// Wait until a request slot is available and claim it
    pub async fn acquire(&self) {
        let mut state = self.state.lock().await;
        let window = self.limit.window();
        let min_interval = self.limit.min_interval();
        let max = self.limit.max_requests as usize;

        loop {
            let now = Instant::now();
            while let Some(&oldest) = state.window.front() {
                if now.duration_since(oldest) >= window {
                    state.window.pop_front();
                } else {
                    break;
                }
            }

            let mut ready_at = None;
            if let Some(last) = state.last {
                let next = last + min_interval;
                if next > now {
                    ready_at = Some(next);
                }
            }
            if max > 0 && state.window.len() >= max {
                if let Some(&oldest) = state.window.front() {
                    let next = oldest + window;
                    ready_at = Some(ready_at.map_or(next, |r: Instant| r.max(next)));
                }
            }

            match ready_at {
                Some(at) => tokio::time::sleep_until(at).await,
                None => {
                    state.last = Some(now);
                    if max > 0 {
                        state.window.push_back(now);
                    }
                    return;
                }
            }
        }
    }
}
