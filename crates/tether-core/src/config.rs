//! Configuration management for tether.
//!
//! Loads configuration from ${TETHER_HOME}/config.toml with sensible
//! defaults. Secrets may come from the environment instead of the file.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::agent::{AgentBackend, PermissionPolicy};

/// Telegram transport configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    /// Bot token for the Telegram API. `TETHER_BOT_TOKEN` overrides.
    pub bot_token: Option<String>,
}

/// Streaming backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    pub model: String,
    /// API key; `ANTHROPIC_API_KEY` is the fallback.
    pub api_key: Option<String>,
    pub base_url: String,
    pub max_tokens: u32,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-5".to_string(),
            api_key: None,
            base_url: "https://api.anthropic.com".to_string(),
            max_tokens: 4096,
        }
    }
}

/// Subprocess backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Binary name or path of the agent CLI.
    pub binary: String,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            binary: "claude".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend: AgentBackend,
    pub permission_mode: PermissionPolicy,
    /// How long an approval prompt stays answerable, in seconds.
    pub approval_timeout_secs: u64,
    /// Idle limit for a single agent invocation, in seconds. Time spent
    /// waiting on approvals does not count.
    pub invocation_timeout_secs: u64,
    /// Turns retained per conversation before front-trimming.
    pub max_history_turns: usize,
    /// Outbound message chunk size, in characters.
    pub max_message_length: usize,
    /// Display cap for tool input in approval prompts, in characters.
    pub max_tool_input_display: usize,
    /// Root under which per-conversation directories are created.
    /// Defaults to `<TETHER_HOME>/sessions`.
    pub session_root: Option<PathBuf>,
    pub telegram: TelegramConfig,
    pub streaming: StreamingConfig,
    pub cli: CliConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: AgentBackend::Streaming,
            permission_mode: PermissionPolicy::Interactive,
            approval_timeout_secs: 300,
            invocation_timeout_secs: 300,
            max_history_turns: 20,
            max_message_length: 4000,
            max_tool_input_display: 400,
            session_root: None,
            telegram: TelegramConfig::default(),
            streaming: StreamingConfig::default(),
            cli: CliConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from the default config path.
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_path())
    }

    /// Loads configuration from a specific path.
    /// Returns defaults if the file doesn't exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config from {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn approval_timeout(&self) -> Duration {
        Duration::from_secs(self.approval_timeout_secs)
    }

    pub fn invocation_timeout(&self) -> Duration {
        Duration::from_secs(self.invocation_timeout_secs)
    }

    /// Session root with the default applied.
    pub fn session_root(&self) -> PathBuf {
        self.session_root
            .clone()
            .unwrap_or_else(|| paths::tether_home().join("sessions"))
    }
}

/// Resolves an API key with precedence: config > env.
pub fn resolve_api_key(config_api_key: Option<&str>, env_var: &str) -> Result<String> {
    if let Some(key) = config_api_key {
        let trimmed = key.trim();
        if !trimmed.is_empty() {
            return Ok(trimmed.to_string());
        }
    }
    std::env::var(env_var)
        .context(format!("No API key available. Set {env_var} or api_key in [streaming]."))
}

pub mod paths {
    //! Path resolution for tether configuration and data directories.
    //!
    //! TETHER_HOME resolution order:
    //! 1. TETHER_HOME environment variable (if set)
    //! 2. ~/.tether (default)

    use std::path::PathBuf;

    /// Returns the tether home directory.
    pub fn tether_home() -> PathBuf {
        if let Ok(home) = std::env::var("TETHER_HOME") {
            return PathBuf::from(home);
        }
        std::env::var("HOME")
            .map(|h| PathBuf::from(h).join(".tether"))
            .unwrap_or_else(|_| PathBuf::from(".tether"))
    }

    /// Returns the path to the config.toml file.
    pub fn config_path() -> PathBuf {
        tether_home().join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_the_documented_values() {
        let config = Config::default();
        assert_eq!(config.backend, AgentBackend::Streaming);
        assert_eq!(config.permission_mode, PermissionPolicy::Interactive);
        assert_eq!(config.approval_timeout(), Duration::from_secs(300));
        assert_eq!(config.invocation_timeout(), Duration::from_secs(300));
        assert_eq!(config.max_history_turns, 20);
        assert_eq!(config.max_message_length, 4000);
        assert_eq!(config.max_tool_input_display, 400);
        assert_eq!(config.cli.binary, "claude");
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = Config::load_from(Path::new("/nonexistent/tether/config.toml")).unwrap();
        assert_eq!(config.max_history_turns, 20);
    }

    #[test]
    fn partial_file_keeps_defaults_for_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(
            file,
            "backend = \"subprocess\"\nmax_history_turns = 8\n\n[cli]\nbinary = \"my-agent\"\n"
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.backend, AgentBackend::Subprocess);
        assert_eq!(config.max_history_turns, 8);
        assert_eq!(config.cli.binary, "my-agent");
        // Untouched sections keep their defaults.
        assert_eq!(config.max_message_length, 4000);
        assert_eq!(config.streaming.base_url, "https://api.anthropic.com");
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "backend = [not toml").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn api_key_prefers_config_over_env() {
        let key = resolve_api_key(Some("  sk-from-config  "), "TETHER_TEST_UNSET_KEY").unwrap();
        assert_eq!(key, "sk-from-config");
    }

    #[test]
    fn api_key_errors_when_nothing_is_set() {
        assert!(resolve_api_key(None, "TETHER_TEST_UNSET_KEY").is_err());
        assert!(resolve_api_key(Some("   "), "TETHER_TEST_UNSET_KEY").is_err());
    }
}
