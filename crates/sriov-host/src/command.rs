//! External command execution
//!
//! `modprobe`, `setpci`, `pgrep`, `pkill` and `pf_bb_config` are reached
//! through [`CommandRunner`] so device configuration can be tested without
//! touching the host.

use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::HostError;

/// Captured result of a finished command
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    /// Exit code, -1 when killed by a signal
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

fn render(program: &str, args: &[String]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{program} {}", args.join(" "))
    }
}

/// Trait for running host commands
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion and capture output; a non-zero exit is not an error here
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, HostError>;

    /// Start a long-lived process without waiting for it
    async fn spawn(&self, program: &str, args: &[String]) -> Result<(), HostError>;

    /// Run and require exit code 0, returning stdout
    async fn run_checked(&self, program: &str, args: &[String]) -> Result<String, HostError> {
        let output = self.run(program, args).await?;
        if output.success() {
            Ok(output.stdout)
        } else {
            Err(HostError::Command {
                command: render(program, args),
                status: output.status,
                stderr: output.stderr.trim().to_string(),
            })
        }
    }
}

/// Runs commands on the host with `tokio::process`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommandRunner;

#[async_trait::async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, HostError> {
        debug!(command = %render(program, args), "Running command");
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| HostError::Spawn {
                command: render(program, args),
                source,
            })?;

        Ok(CommandOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn spawn(&self, program: &str, args: &[String]) -> Result<(), HostError> {
        let command = render(program, args);
        debug!(command = %command, "Spawning process");
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| HostError::Spawn {
                command: command.clone(),
                source,
            })?;

        // Reap the child when it exits
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if status.success() => debug!(command = %command, "Process exited"),
                Ok(status) => warn!(command = %command, status = %status, "Process exited with failure"),
                Err(e) => warn!(command = %command, error = %e, "Failed to wait for process"),
            }
        });
        Ok(())
    }
}
