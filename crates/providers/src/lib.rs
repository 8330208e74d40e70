pub mod decoder;
pub mod openai_compat;
pub mod sse;
pub mod traits;
pub mod util;

// Re-exports for convenience.
pub use decoder::StreamDecoder;
pub use openai_compat::OpenAiCompatProvider;
pub use traits::{ChatRequest, LlmProvider};
