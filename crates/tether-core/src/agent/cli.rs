//! Subprocess backend: runs the agent CLI one invocation per turn inside
//! the conversation's working directory. Continuity comes from the CLI's
//! own `--continue` session state, keyed by that directory.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::agent::PermissionPolicy;
use crate::text::truncate_for_display;
use crate::turn::TurnOutcome;

const STDERR_DISPLAY_CAP: usize = 1000;

pub struct CliAgentClient {
    binary: String,
    timeout: Duration,
}

impl CliAgentClient {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    /// Runs one turn. Every failure mode lands in a [`TurnOutcome`]; a
    /// timed-out child is killed rather than left running.
    pub async fn run(
        &self,
        prompt: &str,
        policy: PermissionPolicy,
        workdir: &Path,
    ) -> TurnOutcome {
        let permission_mode = match policy {
            PermissionPolicy::Bypass => "bypassPermissions",
            PermissionPolicy::Interactive => "default",
        };

        debug!(binary = %self.binary, workdir = %workdir.display(), "spawning agent CLI");
        let mut command = Command::new(&self.binary);
        command
            .arg("--print")
            .arg("--permission-mode")
            .arg(permission_mode)
            .arg("--continue")
            .arg(prompt)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so a timeout can take down anything the CLI
        // itself spawned, not just the direct child.
        #[cfg(unix)]
        command.process_group(0);

        let child = match command.spawn() {
            Ok(child) => child,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return TurnOutcome::Failed {
                    message: format!("Agent CLI '{}' not found on PATH.", self.binary),
                };
            }
            Err(err) => {
                return TurnOutcome::Failed {
                    message: format!("Failed to start agent CLI: {err}"),
                };
            }
        };

        #[cfg(unix)]
        let group_id = child.id();

        // kill_on_drop reaps the direct child when the timeout wins the race;
        // the group kill sweeps up its descendants.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => {
                return TurnOutcome::Failed {
                    message: format!("Agent CLI I/O error: {err}"),
                };
            }
            Err(_) => {
                warn!(timeout_secs = self.timeout.as_secs(), "agent CLI timed out");
                #[cfg(unix)]
                kill_process_group(group_id);
                return TurnOutcome::TimedOut;
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let summary = truncate_for_display(stderr.trim(), STDERR_DISPLAY_CAP);
            return TurnOutcome::Failed {
                message: if summary.is_empty() {
                    format!("Agent CLI exited with {}", output.status)
                } else {
                    format!("Agent CLI exited with {}: {summary}", output.status)
                },
            };
        }

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        TurnOutcome::Completed {
            text,
            media: Vec::new(),
        }
    }
}

/// Sends SIGKILL to the child's process group. The child was spawned with
/// `process_group(0)`, so its pid doubles as the group id.
#[cfg(unix)]
fn kill_process_group(group_id: Option<u32>) {
    let Some(pgid) = group_id.and_then(|id| i32::try_from(id).ok()) else {
        return;
    };
    // SAFETY: signalling a process group id obtained from Child::id().
    unsafe {
        libc::kill(-pgid, libc::SIGKILL);
    }
}
