//! Per-user fixed-window rate limiting for externally-costly tools.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use cs_domain::config::RateLimitConfig;
use cs_domain::trace::TraceEvent;

/// Entries are pruned once the table grows past this many users.
const PRUNE_THRESHOLD: usize = 4096;

#[derive(Debug, Clone, Copy)]
struct Window {
    start: Instant,
    count: u32,
}

/// One budget per user, shared by every gated tool.
///
/// Not persisted: counters reset when the process restarts.
pub struct RateLimiter {
    window: Duration,
    max_requests: u32,
    state: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            window,
            max_requests,
            state: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(cfg: &RateLimitConfig) -> Self {
        Self::new(Duration::from_secs(cfg.window_secs), cfg.max_requests)
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn allow(&self, user_id: &str) -> bool {
        self.allow_at(user_id, Instant::now())
    }

    /// Admit or deny one operation at `now`. A denial leaves the counter
    /// untouched.
    pub fn allow_at(&self, user_id: &str, now: Instant) -> bool {
        let mut state = self.state.lock();

        if state.len() > PRUNE_THRESHOLD {
            let window = self.window;
            state.retain(|_, w| now.saturating_duration_since(w.start) <= window);
        }

        let entry = state
            .entry(user_id.to_string())
            .or_insert(Window { start: now, count: 0 });

        if now.saturating_duration_since(entry.start) > self.window {
            *entry = Window { start: now, count: 0 };
        }
        if entry.count >= self.max_requests {
            return false;
        }
        entry.count += 1;
        true
    }

    /// [`allow`](Self::allow) plus a `RateLimited` trace event on denial.
    pub fn check(&self, user_id: &str, tool: &str) -> bool {
        let allowed = self.allow(user_id);
        if !allowed {
            tracing::warn!(user_id = %user_id, tool = %tool, "rate limit exceeded");
            TraceEvent::RateLimited {
                user_id: user_id.to_string(),
                tool: tool.to_string(),
            }
            .emit();
        }
        allowed
    }

    /// The text handed back to the model when a request is denied.
    pub fn denial_message(&self) -> String {
        format!(
            "Rate limit exceeded: at most {} web requests are allowed every {} seconds. \
             Please try again shortly.",
            self.max_requests,
            self.window.as_secs()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_exactly_max_then_denies() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 3);
        let t0 = Instant::now();
        assert!(limiter.allow_at("u1", t0));
        assert!(limiter.allow_at("u1", t0 + Duration::from_secs(1)));
        assert!(limiter.allow_at("u1", t0 + Duration::from_secs(2)));
        assert!(!limiter.allow_at("u1", t0 + Duration::from_secs(3)));
        assert!(!limiter.allow_at("u1", t0 + Duration::from_secs(59)));
    }

    #[test]
    fn window_rolls_over() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 1);
        let t0 = Instant::now();
        assert!(limiter.allow_at("u1", t0));
        assert!(!limiter.allow_at("u1", t0 + Duration::from_secs(60)));
        assert!(limiter.allow_at("u1", t0 + Duration::from_secs(61)));
        assert!(!limiter.allow_at("u1", t0 + Duration::from_secs(62)));
    }

    #[test]
    fn users_have_independent_budgets() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 1);
        let t0 = Instant::now();
        assert!(limiter.allow_at("alice", t0));
        assert!(!limiter.allow_at("alice", t0));
        assert!(limiter.allow_at("bob", t0));
    }

    #[test]
    fn denial_message_names_the_budget() {
        let limiter = RateLimiter::from_config(&RateLimitConfig::default());
        let msg = limiter.denial_message();
        assert!(msg.contains("10 web requests"));
        assert!(msg.contains("60 seconds"));
    }
}
