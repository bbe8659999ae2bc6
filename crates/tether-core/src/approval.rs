//! Tool-use approval coordination.
//!
//! When the agent wants to invoke a privileged tool, a request is parked
//! here under a fresh id while the transport surfaces it to a human. The
//! invoking task waits on a single-use channel; a button press (or a
//! timeout) resolves the request exactly once.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{Mutex, oneshot};
use tracing::debug;

/// Lifecycle of an approval request. Terminal states are never revisited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Denied,
    Expired,
}

/// A parked tool-use request awaiting a human decision.
#[derive(Debug, Clone)]
pub struct ApprovalRequest {
    pub id: String,
    pub tool_name: String,
    pub tool_input: Value,
    pub status: ApprovalStatus,
    pub created_at: DateTime<Utc>,
    /// Transport message id of the rendered prompt, once known. Lets the
    /// expiry path edit the prompt in place.
    pub prompt_message_id: Option<i64>,
}

/// Outcome of waiting on a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    Approved,
    Denied,
    Expired,
    /// The id was never created, or its entry was already reclaimed.
    NotFound,
}

impl WaitResult {
    pub fn is_approved(self) -> bool {
        matches!(self, WaitResult::Approved)
    }
}

struct PendingEntry {
    request: ApprovalRequest,
    tx: Option<oneshot::Sender<bool>>,
    rx: Option<oneshot::Receiver<bool>>,
}

/// Correlates in-flight approval requests with their eventual decisions.
///
/// Shared via `Arc` between the agent turn (which creates and waits) and
/// the transport callbacks (which resolve). Entries are removed by the
/// waiter, never by the resolver, so a decision racing the timeout always
/// finds the record it needs.
#[derive(Default)]
pub struct ApprovalCoordinator {
    pending: Mutex<HashMap<String, PendingEntry>>,
}

impl ApprovalCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parks a new request and returns its id.
    pub async fn create(&self, tool_name: &str, tool_input: Value) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        let request = ApprovalRequest {
            id: id.clone(),
            tool_name: tool_name.to_string(),
            tool_input,
            status: ApprovalStatus::Pending,
            created_at: Utc::now(),
            prompt_message_id: None,
        };
        debug!(id = %id, tool = %tool_name, "approval request created");
        let mut pending = self.pending.lock().await;
        pending.insert(
            id.clone(),
            PendingEntry { request, tx: Some(tx), rx: Some(rx) },
        );
        id
    }

    /// Waits for a decision on `id`, up to `timeout`.
    ///
    /// On timeout the request is marked expired; a decision that landed
    /// just before the deadline is still honored. The entry is reclaimed
    /// before returning, after which late decisions become no-ops.
    pub async fn wait(&self, id: &str, timeout: Duration) -> WaitResult {
        let rx = {
            let mut pending = self.pending.lock().await;
            match pending.get_mut(id) {
                Some(entry) => match entry.rx.take() {
                    Some(rx) => rx,
                    None => return WaitResult::NotFound,
                },
                None => return WaitResult::NotFound,
            }
        };

        let result = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(true)) => WaitResult::Approved,
            Ok(Ok(false)) => WaitResult::Denied,
            // Sender dropped without a decision; treat like a timeout.
            Ok(Err(_)) | Err(_) => {
                let mut pending = self.pending.lock().await;
                match pending.get_mut(id) {
                    Some(entry) => match entry.request.status {
                        ApprovalStatus::Approved => WaitResult::Approved,
                        ApprovalStatus::Denied => WaitResult::Denied,
                        ApprovalStatus::Pending | ApprovalStatus::Expired => {
                            entry.request.status = ApprovalStatus::Expired;
                            WaitResult::Expired
                        }
                    },
                    None => WaitResult::NotFound,
                }
            }
        };

        let mut pending = self.pending.lock().await;
        pending.remove(id);
        debug!(id = %id, ?result, "approval request settled");
        result
    }

    /// Delivers a decision for `id`. Returns `false` when the request is
    /// unknown or already resolved; a double press changes nothing.
    pub async fn resolve(&self, id: &str, approved: bool) -> bool {
        let mut pending = self.pending.lock().await;
        let Some(entry) = pending.get_mut(id) else {
            return false;
        };
        if entry.request.status != ApprovalStatus::Pending {
            return false;
        }
        entry.request.status = if approved {
            ApprovalStatus::Approved
        } else {
            ApprovalStatus::Denied
        };
        if let Some(tx) = entry.tx.take() {
            // A waiter that already timed out drops its receiver; the
            // status update above still records the decision.
            let _ = tx.send(approved);
        }
        debug!(id = %id, approved, "approval request resolved");
        true
    }

    /// Snapshot of a request, if it is still tracked.
    pub async fn lookup(&self, id: &str) -> Option<ApprovalRequest> {
        let pending = self.pending.lock().await;
        pending.get(id).map(|entry| entry.request.clone())
    }

    /// Records the transport message id of the rendered prompt.
    pub async fn set_prompt_message_id(&self, id: &str, message_id: i64) {
        let mut pending = self.pending.lock().await;
        if let Some(entry) = pending.get_mut(id) {
            entry.request.prompt_message_id = Some(message_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn resolve_before_wait_completes_immediately() {
        let coordinator = ApprovalCoordinator::new();
        let id = coordinator.create("Bash", json!({"command": "ls"})).await;
        assert!(coordinator.resolve(&id, true).await);

        let result = coordinator.wait(&id, Duration::from_secs(300)).await;
        assert_eq!(result, WaitResult::Approved);
        assert!(coordinator.lookup(&id).await.is_none());
    }

    #[tokio::test]
    async fn denial_is_delivered_to_the_waiter() {
        let coordinator = Arc::new(ApprovalCoordinator::new());
        let id = coordinator
            .create("Write", json!({"path": "/etc/passwd"}))
            .await;

        let waiter = {
            let coordinator = Arc::clone(&coordinator);
            let id = id.clone();
            tokio::spawn(async move { coordinator.wait(&id, Duration::from_secs(300)).await })
        };
        tokio::task::yield_now().await;
        assert!(coordinator.resolve(&id, false).await);

        assert_eq!(waiter.await.unwrap(), WaitResult::Denied);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_expires_the_request_and_late_presses_fail() {
        let coordinator = ApprovalCoordinator::new();
        let id = coordinator
            .create("Bash", json!({"command": "cat secrets.txt"}))
            .await;

        let result = coordinator.wait(&id, Duration::from_secs(300)).await;
        assert_eq!(result, WaitResult::Expired);

        // The entry is gone; a late button press is a no-op.
        assert!(!coordinator.resolve(&id, true).await);
        assert!(coordinator.lookup(&id).await.is_none());
    }

    #[tokio::test]
    async fn double_resolve_is_rejected() {
        let coordinator = ApprovalCoordinator::new();
        let id = coordinator.create("Bash", json!({"command": "ls"})).await;

        assert!(coordinator.resolve(&id, true).await);
        assert!(!coordinator.resolve(&id, false).await);

        let result = coordinator.wait(&id, Duration::from_secs(1)).await;
        assert_eq!(result, WaitResult::Approved);
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let coordinator = ApprovalCoordinator::new();
        assert!(!coordinator.resolve("nope", true).await);
        assert!(coordinator.lookup("nope").await.is_none());
        let result = coordinator.wait("nope", Duration::from_secs(1)).await;
        assert_eq!(result, WaitResult::NotFound);
    }

    #[tokio::test]
    async fn prompt_message_id_round_trips() {
        let coordinator = ApprovalCoordinator::new();
        let id = coordinator
            .create("Edit", json!({"path": "src/main.rs"}))
            .await;
        coordinator.set_prompt_message_id(&id, 42).await;

        let request = coordinator.lookup(&id).await.unwrap();
        assert_eq!(request.prompt_message_id, Some(42));
        assert_eq!(request.status, ApprovalStatus::Pending);
        assert_eq!(request.tool_name, "Edit");
    }
}
