//! Agent backends and the event contract they share.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod cli;
pub mod streaming;

/// Which engine executes a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentBackend {
    /// Streaming messages API over SSE.
    Streaming,
    /// The agent CLI run as a subprocess.
    Subprocess,
}

/// Whether tool invocations need a human decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionPolicy {
    /// Tools run without asking.
    Bypass,
    /// Every tool use is parked for approval.
    Interactive,
}

/// An image produced during a turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaArtifact {
    /// Base64 payload delivered inline.
    Inline { mime_type: String, data: String },
    /// Fetchable by URL.
    Remote { url: String },
}

/// Categories of backend failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    /// HTTP status error (4xx, 5xx)
    HttpStatus,
    /// Connect, request, or idle-stream timeout
    Timeout,
    /// Malformed response (JSON parse error, invalid SSE, etc.)
    Parse,
    /// Error event returned by the service mid-stream
    Api,
    /// Subprocess spawn or I/O failure
    Io,
}

impl fmt::Display for BackendErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendErrorKind::HttpStatus => write!(f, "http_status"),
            BackendErrorKind::Timeout => write!(f, "timeout"),
            BackendErrorKind::Parse => write!(f, "parse"),
            BackendErrorKind::Api => write!(f, "api_error"),
            BackendErrorKind::Io => write!(f, "io"),
        }
    }
}

/// Structured backend error with kind and optional raw details.
#[derive(Debug, Clone)]
pub struct BackendError {
    pub kind: BackendErrorKind,
    /// One-line summary suitable for display
    pub message: String,
    /// Optional raw error body
    pub details: Option<String>,
}

impl BackendError {
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    pub fn http_status(status: u16, body: &str) -> Self {
        // Surface the service's own message when the body carries one.
        if let Ok(json) = serde_json::from_str::<Value>(body)
            && let Some(msg) = json
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
        {
            return Self {
                kind: BackendErrorKind::HttpStatus,
                message: format!("HTTP {status}: {msg}"),
                details: Some(body.to_string()),
            };
        }
        Self {
            kind: BackendErrorKind::HttpStatus,
            message: format!("HTTP {status}"),
            details: (!body.is_empty()).then(|| body.to_string()),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Timeout, message)
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Parse, message)
    }

    pub fn api(error_type: &str, message: &str) -> Self {
        Self::new(BackendErrorKind::Api, format!("{error_type}: {message}"))
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for BackendError {}

pub type BackendResult<T> = std::result::Result<T, BackendError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_error_extracts_service_message() {
        let body = r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#;
        let err = BackendError::http_status(529, body);
        assert_eq!(err.kind, BackendErrorKind::HttpStatus);
        assert_eq!(err.message, "HTTP 529: Overloaded");
        assert!(err.details.is_some());
    }

    #[test]
    fn http_status_error_without_body_is_bare() {
        let err = BackendError::http_status(500, "");
        assert_eq!(err.message, "HTTP 500");
        assert!(err.details.is_none());
    }

    #[test]
    fn backend_names_round_trip_through_serde() {
        let backend: AgentBackend = serde_json::from_str("\"subprocess\"").unwrap();
        assert_eq!(backend, AgentBackend::Subprocess);
        let policy: PermissionPolicy = serde_json::from_str("\"interactive\"").unwrap();
        assert_eq!(policy, PermissionPolicy::Interactive);
    }
}
