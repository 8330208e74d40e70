//! Core runtime: tool-call assembly, context assembly, per-chat locking and
//! the turn orchestrator.

pub mod assembler;
pub mod chat_lock;
pub mod context;
pub mod turn;

pub use assembler::ToolCallAssembler;
pub use chat_lock::{ChatBusy, ChatLockMap};
pub use turn::{
    ConversationOrchestrator, OrchestratorSettings, TurnEvent, TurnHandle, TurnPhase, TurnRequest,
};
