//! Built-in tools for chatstream.
//!
//! - `web_search` / `web_fetch`: outbound HTTP, gated by a shared per-user
//!   [`RateLimiter`]
//! - `calculator`: strict arithmetic evaluator
//! - `add_memory` / `read_memories`: user facts via a `MemoryStore`
//! - `workspace_search`: ranked search via a `WorkspaceIndex`
//! - `code_interpreter`: placeholder

mod args;
pub mod calculator;
pub mod dispatch;
pub mod memory;
pub mod rate_limit;
pub mod web_fetch;
pub mod web_search;
pub mod workspace_search;

pub use dispatch::{ToolContext, ToolDeps, ToolDispatcher, ToolKind};
pub use rate_limit::RateLimiter;
