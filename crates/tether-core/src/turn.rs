//! One agent turn, end to end: serialize, invoke, record.

use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::info;

use crate::agent::cli::CliAgentClient;
use crate::agent::streaming::StreamingAgentClient;
use crate::agent::{AgentBackend, MediaArtifact, PermissionPolicy};
use crate::approval::ApprovalCoordinator;
use crate::config::Config;
use crate::exec::ExecutionSerializer;
use crate::session::SessionStore;

/// Terminal result of a turn. Nothing the agent does is fatal to the
/// process; every failure mode is a variant here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed {
        text: String,
        media: Vec<MediaArtifact>,
    },
    /// A tool use was denied (or its approval expired); partial text up to
    /// that point is preserved.
    DeniedAborted { text: String },
    TimedOut,
    Failed { message: String },
}

/// Progress events surfaced to the transport while a turn runs.
#[derive(Debug, Clone)]
pub enum TurnUpdate {
    /// A tool use is parked and needs a human decision.
    ApprovalRequested {
        id: String,
        tool_name: String,
        tool_input: Value,
    },
    /// A decision arrived through the transport.
    ApprovalResolved { id: String, approved: bool },
    /// Nobody answered in time.
    ApprovalExpired { id: String },
}

pub type TurnUpdateTx = mpsc::UnboundedSender<TurnUpdate>;
pub type TurnUpdateRx = mpsc::UnboundedReceiver<TurnUpdate>;

pub fn update_channel() -> (TurnUpdateTx, TurnUpdateRx) {
    mpsc::unbounded_channel()
}

enum Engine {
    Streaming(StreamingAgentClient),
    Subprocess(CliAgentClient),
}

/// Runs turns against the configured backend, one per conversation at a
/// time, and keeps history consistent.
pub struct TurnEngine {
    engine: Engine,
    backend: AgentBackend,
    policy: PermissionPolicy,
    serializer: ExecutionSerializer,
    sessions: Arc<SessionStore>,
    approvals: Arc<ApprovalCoordinator>,
    approval_timeout: std::time::Duration,
}

impl TurnEngine {
    /// Builds the engine for the configured backend. Fails only when the
    /// streaming backend is selected without an API key.
    pub fn new(
        config: &Config,
        sessions: Arc<SessionStore>,
        approvals: Arc<ApprovalCoordinator>,
    ) -> Result<Self> {
        let engine = match config.backend {
            AgentBackend::Streaming => {
                Engine::Streaming(StreamingAgentClient::from_config(config)?)
            }
            AgentBackend::Subprocess => Engine::Subprocess(CliAgentClient::new(
                config.cli.binary.clone(),
                config.invocation_timeout(),
            )),
        };
        Ok(Self {
            engine,
            backend: config.backend,
            policy: config.permission_mode,
            serializer: ExecutionSerializer::new(),
            sessions,
            approvals,
            approval_timeout: config.approval_timeout(),
        })
    }

    pub fn approvals(&self) -> &Arc<ApprovalCoordinator> {
        &self.approvals
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Runs one turn for `key`. Invoke-then-record is a single critical
    /// section, so histories never interleave across concurrent prompts.
    pub async fn run_turn(&self, key: &str, prompt: &str, updates: &TurnUpdateTx) -> TurnOutcome {
        let permit = self.serializer.acquire(key, self.backend).await;
        info!(key = %key, backend = ?self.backend, "turn started");

        let outcome = match &self.engine {
            Engine::Subprocess(cli) => {
                let workdir = self.sessions.isolation_dir(key);
                cli.run(prompt, self.policy, &workdir).await
            }
            Engine::Streaming(streaming) => {
                let history = self.sessions.history(key).await;
                streaming
                    .run(
                        &history,
                        prompt,
                        self.policy,
                        &self.approvals,
                        self.approval_timeout,
                        updates,
                    )
                    .await
            }
        };

        // Timeouts and failures leave no trace in history; a denied turn
        // still records what was said before the abort.
        match &outcome {
            TurnOutcome::Completed { text, .. } | TurnOutcome::DeniedAborted { text } => {
                self.sessions.append_exchange(key, prompt, text).await;
            }
            TurnOutcome::TimedOut | TurnOutcome::Failed { .. } => {}
        }

        drop(permit);
        info!(key = %key, "turn finished");
        outcome
    }
}
