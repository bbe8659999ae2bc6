//! Invocation serialization.
//!
//! Each conversation runs at most one agent turn at a time; the subprocess
//! backend additionally holds a process-wide lock because the underlying
//! CLI cannot run concurrently with itself. tokio mutexes queue waiters in
//! FIFO order, so a burst of prompts in one conversation is handled
//! strictly in arrival order.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::agent::AgentBackend;

/// Proof that the caller may run a turn. Dropping it releases the locks.
pub struct TurnPermit {
    _conversation: OwnedMutexGuard<()>,
    _global: Option<OwnedMutexGuard<()>>,
}

/// Hands out [`TurnPermit`]s, one per conversation at a time.
///
/// Lock entries are retained for the process lifetime: the map holds one
/// small `Arc<Mutex<()>>` per conversation key ever seen, and eviction
/// would race a concurrent `acquire` into a second mutex for the same key.
#[derive(Default)]
pub struct ExecutionSerializer {
    conversations: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    global: Arc<Mutex<()>>,
}

impl ExecutionSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for the conversation's slot (and, for the subprocess backend,
    /// the global slot) and returns a permit holding both.
    pub async fn acquire(&self, key: &str, backend: AgentBackend) -> TurnPermit {
        let conversation_lock = {
            let mut conversations = self.conversations.lock().await;
            Arc::clone(
                conversations
                    .entry(key.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };
        // Conversation lock first; the global lock is only contended while
        // a subprocess turn actually runs.
        let conversation = conversation_lock.lock_owned().await;
        let global = match backend {
            AgentBackend::Subprocess => Some(Arc::clone(&self.global).lock_owned().await),
            AgentBackend::Streaming => None,
        };
        TurnPermit {
            _conversation: conversation,
            _global: global,
        }
    }
}
