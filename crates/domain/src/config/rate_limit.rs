use serde::{Deserialize, Serialize};

/// Per-user fixed-window budget shared by every rate-gated tool.
///
/// A user may perform `max_requests` gated operations per `window_secs`;
/// the budget is one pool across tools, not one per tool.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "d_60")]
    pub window_secs: u64,
    #[serde(default = "d_10")]
    pub max_requests: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: 60,
            max_requests: 10,
        }
    }
}

fn d_60() -> u64 {
    60
}
fn d_10() -> u32 {
    10
}
