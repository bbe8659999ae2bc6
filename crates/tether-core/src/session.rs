//! Per-conversation session state: bounded turn history and isolated
//! working directories for the subprocess backend.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One message in a conversation's history.
#[derive(Debug, Clone)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

#[derive(Default)]
struct Conversation {
    turns: Vec<Turn>,
}

/// Holds history and working directories for every active conversation.
///
/// History is bounded: once a conversation exceeds `max_turns`, the oldest
/// turns are dropped from the front. Conversations never see each other's
/// state.
pub struct SessionStore {
    max_turns: usize,
    session_root: PathBuf,
    conversations: Mutex<HashMap<String, Conversation>>,
}

impl SessionStore {
    pub fn new(max_turns: usize, session_root: PathBuf) -> Self {
        Self {
            max_turns,
            session_root,
            conversations: Mutex::new(HashMap::new()),
        }
    }

    /// Snapshot of the conversation's history, oldest first.
    pub async fn history(&self, key: &str) -> Vec<Turn> {
        let conversations = self.conversations.lock().await;
        conversations
            .get(key)
            .map(|c| c.turns.clone())
            .unwrap_or_default()
    }

    /// Appends a single turn, trimming from the front past `max_turns`.
    pub async fn append(&self, key: &str, role: Role, content: &str) {
        let mut conversations = self.conversations.lock().await;
        let conversation = conversations.entry(key.to_string()).or_default();
        conversation.turns.push(Turn {
            role,
            content: content.to_string(),
        });
        Self::trim(conversation, self.max_turns);
    }

    /// Appends a user/assistant pair atomically, so concurrent writers can
    /// never interleave between a prompt and its reply.
    pub async fn append_exchange(&self, key: &str, prompt: &str, reply: &str) {
        let mut conversations = self.conversations.lock().await;
        let conversation = conversations.entry(key.to_string()).or_default();
        conversation.turns.push(Turn {
            role: Role::User,
            content: prompt.to_string(),
        });
        conversation.turns.push(Turn {
            role: Role::Assistant,
            content: reply.to_string(),
        });
        Self::trim(conversation, self.max_turns);
    }

    fn trim(conversation: &mut Conversation, max_turns: usize) {
        if conversation.turns.len() > max_turns {
            let excess = conversation.turns.len() - max_turns;
            conversation.turns.drain(..excess);
        }
    }

    /// The conversation's working directory, created on first use.
    ///
    /// Creation failure degrades to the shared session root with a warning
    /// rather than failing the turn.
    pub fn isolation_dir(&self, key: &str) -> PathBuf {
        let dir = self.session_root.join(format!("tether-session-{key}"));
        match std::fs::create_dir_all(&dir) {
            Ok(()) => dir,
            Err(err) => {
                warn!(key = %key, %err, "falling back to session root");
                self.session_root.clone()
            }
        }
    }

    pub fn session_root(&self) -> &Path {
        &self.session_root
    }

    /// Drops the conversation's history and removes its working directory.
    pub async fn clear(&self, key: &str) {
        {
            let mut conversations = self.conversations.lock().await;
            conversations.remove(key);
        }
        let dir = self.session_root.join(format!("tether-session-{key}"));
        if dir.is_dir() {
            if let Err(err) = std::fs::remove_dir_all(&dir) {
                warn!(key = %key, %err, "failed to remove session directory");
            }
        }
        debug!(key = %key, "conversation cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(max_turns: usize) -> (SessionStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(max_turns, dir.path().to_path_buf());
        (store, dir)
    }

    #[tokio::test]
    async fn history_is_trimmed_from_the_front() {
        let (store, _dir) = store(4);
        for i in 0..6 {
            store.append("chat", Role::User, &format!("m{i}")).await;
        }

        let history = store.history("chat").await;
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].content, "m2");
        assert_eq!(history[3].content, "m5");
    }

    #[tokio::test]
    async fn exchanges_stay_contiguous_under_trimming() {
        let (store, _dir) = store(4);
        for i in 0..5 {
            store
                .append_exchange("chat", &format!("q{i}"), &format!("a{i}"))
                .await;
        }

        let history = store.history("chat").await;
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[0].content, "q3");
        assert_eq!(history[1].content, "a3");
        assert_eq!(history[2].content, "q4");
        assert_eq!(history[3].content, "a4");
    }

    #[tokio::test]
    async fn conversations_are_isolated() {
        let (store, _dir) = store(20);
        store.append("a", Role::User, "for a").await;
        store.append("b", Role::User, "for b").await;

        assert_eq!(store.history("a").await.len(), 1);
        assert_eq!(store.history("b").await.len(), 1);
        assert_eq!(store.history("a").await[0].content, "for a");
    }

    #[tokio::test]
    async fn clear_drops_history_and_directory() {
        let (store, _dir) = store(20);
        store.append("chat", Role::User, "hi").await;
        let session_dir = store.isolation_dir("chat");
        assert!(session_dir.is_dir());

        store.clear("chat").await;
        assert!(store.history("chat").await.is_empty());
        assert!(!session_dir.exists());
    }

    #[tokio::test]
    async fn isolation_dirs_differ_per_conversation() {
        let (store, _dir) = store(20);
        let a = store.isolation_dir("a");
        let b = store.isolation_dir("b");
        assert_ne!(a, b);
        assert!(a.ends_with("tether-session-a"));
    }
}
