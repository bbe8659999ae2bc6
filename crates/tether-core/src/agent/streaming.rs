//! Streaming backend: one SSE request to a messages-style API per turn.
//!
//! Tool-use blocks are assembled from `content_block_start` +
//! `input_json_delta` events; in interactive mode each completed tool use
//! parks the stream on the approval coordinator before continuing. The
//! idle timeout applies between stream events only, never to the time a
//! human spends deciding.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use eventsource_stream::Eventsource;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::agent::{
    BackendError, BackendErrorKind, BackendResult, MediaArtifact, PermissionPolicy,
};
use crate::approval::{ApprovalCoordinator, WaitResult};
use crate::config::{Config, resolve_api_key};
use crate::session::Turn;
use crate::turn::{TurnOutcome, TurnUpdate, TurnUpdateTx};

const API_VERSION: &str = "2023-06-01";
const USER_AGENT: &str = concat!("tether/", env!("CARGO_PKG_VERSION"));

fn denial_notice(tool_name: &str) -> String {
    format!("\n\n❌ Tool '{tool_name}' was denied. Stopping execution.")
}

/// Normalized stream items. Everything the wire can carry that tether does
/// not model collapses into `Skip` here; nothing unknown flows further in.
#[derive(Debug, Clone, PartialEq, Eq)]
enum StreamItem {
    TextDelta(String),
    Image(MediaArtifact),
    ToolUseStart { index: usize, name: String },
    InputJsonDelta { index: usize, partial_json: String },
    BlockStop { index: usize },
    MessageStop,
    ApiError { error_type: String, message: String },
    Skip,
}

pub struct StreamingAgentClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    idle_timeout: Duration,
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    stream: bool,
    messages: Vec<WireMessage<'a>>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

impl StreamingAgentClient {
    /// # Errors
    /// Fails when no API key is available from config or environment.
    pub fn from_config(config: &Config) -> Result<Self> {
        let api_key = resolve_api_key(config.streaming.api_key.as_deref(), "ANTHROPIC_API_KEY")?;
        Ok(Self {
            http: reqwest::Client::new(),
            base_url: config.streaming.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.streaming.model.clone(),
            max_tokens: config.streaming.max_tokens,
            idle_timeout: config.invocation_timeout(),
        })
    }

    /// Runs one turn against the streaming API.
    pub async fn run(
        &self,
        history: &[Turn],
        prompt: &str,
        policy: PermissionPolicy,
        approvals: &ApprovalCoordinator,
        approval_timeout: Duration,
        updates: &TurnUpdateTx,
    ) -> TurnOutcome {
        let mut messages: Vec<WireMessage<'_>> = history
            .iter()
            .map(|turn| WireMessage {
                role: turn.role.as_str(),
                content: &turn.content,
            })
            .collect();
        messages.push(WireMessage {
            role: "user",
            content: prompt,
        });

        let request = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            stream: true,
            messages,
        };
        let url = format!("{}/v1/messages", self.base_url);

        let response = match self
            .http
            .post(&url)
            .header("content-type", "application/json")
            .header("accept", "application/json")
            .header("user-agent", USER_AGENT)
            .header("anthropic-version", API_VERSION)
            .header("x-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) if err.is_timeout() => return TurnOutcome::TimedOut,
            Err(err) => {
                return TurnOutcome::Failed {
                    message: format!("Request failed: {err}"),
                };
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = BackendError::http_status(status.as_u16(), &body);
            warn!(%err, "streaming request rejected");
            return TurnOutcome::Failed {
                message: err.message,
            };
        }

        let items = response.bytes_stream().eventsource().map(|result| {
            result
                .map_err(|err| BackendError::parse(format!("SSE stream error: {err}")))
                .and_then(|event| parse_stream_item(&event.event, &event.data))
        });
        self.consume(Box::pin(items), policy, approvals, approval_timeout, updates)
            .await
    }

    /// Drains the item stream into a [`TurnOutcome`], pausing on tool use
    /// in interactive mode.
    async fn consume<S>(
        &self,
        mut items: S,
        policy: PermissionPolicy,
        approvals: &ApprovalCoordinator,
        approval_timeout: Duration,
        updates: &TurnUpdateTx,
    ) -> TurnOutcome
    where
        S: Stream<Item = BackendResult<StreamItem>> + Unpin,
    {
        let mut text = String::new();
        let mut media = Vec::new();
        let mut tools: HashMap<usize, ToolAssembly> = HashMap::new();

        loop {
            let next = match tokio::time::timeout(self.idle_timeout, items.next()).await {
                Ok(next) => next,
                Err(_) => {
                    warn!(idle_secs = self.idle_timeout.as_secs(), "stream went idle");
                    return TurnOutcome::TimedOut;
                }
            };
            let item = match next {
                Some(Ok(item)) => item,
                Some(Err(err)) if err.kind == BackendErrorKind::Timeout => {
                    return TurnOutcome::TimedOut;
                }
                Some(Err(err)) => {
                    return TurnOutcome::Failed {
                        message: err.message,
                    };
                }
                None => break,
            };

            match item {
                StreamItem::TextDelta(delta) => text.push_str(&delta),
                StreamItem::Image(artifact) => media.push(artifact),
                StreamItem::ToolUseStart { index, name } => {
                    tools.insert(
                        index,
                        ToolAssembly {
                            name,
                            input_json: String::new(),
                        },
                    );
                }
                StreamItem::InputJsonDelta {
                    index,
                    partial_json,
                } => {
                    if let Some(tool) = tools.get_mut(&index) {
                        tool.input_json.push_str(&partial_json);
                    }
                }
                StreamItem::BlockStop { index } => {
                    if let Some(tool) = tools.remove(&index) {
                        match self
                            .gate_tool_use(tool, policy, approvals, approval_timeout, updates)
                            .await
                        {
                            ToolGate::Proceed => {}
                            ToolGate::Abort { notice } => {
                                text.push_str(&notice);
                                return TurnOutcome::DeniedAborted {
                                    text: text.trim().to_string(),
                                };
                            }
                            ToolGate::Fail { message } => {
                                return TurnOutcome::Failed { message };
                            }
                        }
                    }
                }
                StreamItem::MessageStop => break,
                StreamItem::ApiError {
                    error_type,
                    message,
                } => {
                    let err = BackendError::api(&error_type, &message);
                    return TurnOutcome::Failed {
                        message: err.message,
                    };
                }
                StreamItem::Skip => {}
            }
        }

        TurnOutcome::Completed {
            text: text.trim().to_string(),
            media,
        }
    }

    /// Parks a completed tool-use block for approval when the policy asks
    /// for it.
    async fn gate_tool_use(
        &self,
        tool: ToolAssembly,
        policy: PermissionPolicy,
        approvals: &ApprovalCoordinator,
        approval_timeout: Duration,
        updates: &TurnUpdateTx,
    ) -> ToolGate {
        let input: Value = if tool.input_json.trim().is_empty() {
            Value::Object(serde_json::Map::new())
        } else {
            match serde_json::from_str(&tool.input_json) {
                Ok(value) => value,
                Err(err) => {
                    return ToolGate::Fail {
                        message: format!("Malformed input for tool '{}': {err}", tool.name),
                    };
                }
            }
        };

        match policy {
            PermissionPolicy::Bypass => {
                debug!(tool = %tool.name, "tool use (bypass)");
                ToolGate::Proceed
            }
            PermissionPolicy::Interactive => {
                let id = approvals.create(&tool.name, input.clone()).await;
                let _ = updates.send(TurnUpdate::ApprovalRequested {
                    id: id.clone(),
                    tool_name: tool.name.clone(),
                    tool_input: input,
                });
                match approvals.wait(&id, approval_timeout).await {
                    WaitResult::Approved => {
                        let _ = updates.send(TurnUpdate::ApprovalResolved { id, approved: true });
                        ToolGate::Proceed
                    }
                    WaitResult::Denied | WaitResult::NotFound => {
                        let _ = updates.send(TurnUpdate::ApprovalResolved {
                            id,
                            approved: false,
                        });
                        ToolGate::Abort {
                            notice: denial_notice(&tool.name),
                        }
                    }
                    WaitResult::Expired => {
                        let _ = updates.send(TurnUpdate::ApprovalExpired { id });
                        ToolGate::Abort {
                            notice: denial_notice(&tool.name),
                        }
                    }
                }
            }
        }
    }
}

struct ToolAssembly {
    name: String,
    input_json: String,
}

enum ToolGate {
    Proceed,
    Abort { notice: String },
    Fail { message: String },
}

fn parse_stream_item(event_type: &str, data: &str) -> BackendResult<StreamItem> {
    let data = data.trim();
    match event_type {
        "content_block_start" => {
            let parsed: SseContentBlockStart = serde_json::from_str(data).map_err(|err| {
                BackendError::parse(format!("Failed to parse content_block_start: {err}"))
            })?;
            match parsed.content_block.block_type.as_str() {
                "tool_use" => {
                    let name = parsed.content_block.name.ok_or_else(|| {
                        BackendError::parse("tool_use block without a name".to_string())
                    })?;
                    Ok(StreamItem::ToolUseStart {
                        index: parsed.index,
                        name,
                    })
                }
                "image" => match parsed.content_block.source {
                    Some(source) => Ok(StreamItem::Image(source.into_artifact()?)),
                    None => Err(BackendError::parse(
                        "image block without a source".to_string(),
                    )),
                },
                // Text arrives via deltas; anything else is outside the
                // modeled event set and is dropped here.
                other => {
                    debug!(block_type = %other, "ignoring content block");
                    Ok(StreamItem::Skip)
                }
            }
        }
        "content_block_delta" => {
            let parsed: SseContentBlockDelta = serde_json::from_str(data).map_err(|err| {
                BackendError::parse(format!("Failed to parse content_block_delta: {err}"))
            })?;
            match parsed.delta.delta_type.as_str() {
                "text_delta" => Ok(StreamItem::TextDelta(parsed.delta.text.unwrap_or_default())),
                "input_json_delta" => Ok(StreamItem::InputJsonDelta {
                    index: parsed.index,
                    partial_json: parsed.delta.partial_json.unwrap_or_default(),
                }),
                _ => Ok(StreamItem::Skip),
            }
        }
        "content_block_stop" => {
            let parsed: SseContentBlockStop = serde_json::from_str(data).map_err(|err| {
                BackendError::parse(format!("Failed to parse content_block_stop: {err}"))
            })?;
            Ok(StreamItem::BlockStop {
                index: parsed.index,
            })
        }
        "message_stop" => Ok(StreamItem::MessageStop),
        "error" => {
            let parsed: SseError = serde_json::from_str(data)
                .map_err(|err| BackendError::parse(format!("Failed to parse error: {err}")))?;
            Ok(StreamItem::ApiError {
                error_type: parsed.error.error_type,
                message: parsed.error.message,
            })
        }
        "ping" | "message_start" | "message_delta" => Ok(StreamItem::Skip),
        other => {
            debug!(event = %other, "ignoring SSE event");
            Ok(StreamItem::Skip)
        }
    }
}

// === SSE response structures ===

#[derive(Debug, Deserialize)]
struct SseContentBlockStart {
    index: usize,
    content_block: SseContentBlock,
}

#[derive(Debug, Deserialize)]
struct SseContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    source: Option<SseImageSource>,
}

#[derive(Debug, Deserialize)]
struct SseImageSource {
    #[serde(rename = "type")]
    source_type: String,
    #[serde(default)]
    media_type: Option<String>,
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

impl SseImageSource {
    fn into_artifact(self) -> BackendResult<MediaArtifact> {
        match self.source_type.as_str() {
            "base64" => match (self.media_type, self.data) {
                (Some(mime_type), Some(data)) => Ok(MediaArtifact::Inline { mime_type, data }),
                _ => Err(BackendError::parse(
                    "base64 image source missing fields".to_string(),
                )),
            },
            "url" => self
                .url
                .map(|url| MediaArtifact::Remote { url })
                .ok_or_else(|| BackendError::parse("url image source missing url".to_string())),
            other => Err(BackendError::parse(format!(
                "Unknown image source type: {other}"
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SseContentBlockDelta {
    index: usize,
    delta: SseDelta,
}

#[derive(Debug, Deserialize)]
struct SseDelta {
    #[serde(rename = "type")]
    delta_type: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    partial_json: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SseContentBlockStop {
    index: usize,
}

#[derive(Debug, Deserialize)]
struct SseError {
    error: SseErrorInfo,
}

#[derive(Debug, Deserialize)]
struct SseErrorInfo {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}
