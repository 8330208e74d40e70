//! Per-chat turn exclusivity.
//!
//! Only one turn may run per chat. A second turn arriving while one is in
//! flight is rejected immediately rather than queued.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

const PRUNE_THRESHOLD: usize = 1024;

/// Each chat id maps to a `Semaphore(1)`; the permit is held by the running
/// turn until its last write.
#[derive(Default)]
pub struct ChatLockMap {
    locks: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl ChatLockMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire under the map lock so a concurrent prune cannot drop the
    /// entry between lookup and acquisition.
    pub fn try_acquire(&self, chat_id: &str) -> Result<OwnedSemaphorePermit, ChatBusy> {
        let mut locks = self.locks.lock();
        if locks.len() > PRUNE_THRESHOLD {
            locks.retain(|_, sem| sem.available_permits() == 0);
        }
        locks
            .entry(chat_id.to_owned())
            .or_insert_with(|| Arc::new(Semaphore::new(1)))
            .clone()
            .try_acquire_owned()
            .map_err(|_| ChatBusy)
    }

    pub fn chat_count(&self) -> usize {
        self.locks.lock().len()
    }

    /// Forget chats with no turn in flight.
    pub fn prune_idle(&self) {
        self.locks.lock().retain(|_, sem| sem.available_permits() == 0);
    }
}

#[derive(Debug)]
pub struct ChatBusy;

impl std::fmt::Display for ChatBusy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "a turn is already in progress for this chat")
    }
}

impl std::error::Error for ChatBusy {}
