//! Shell-backed action runner.
//!
//! Executes `run:` steps through a shell, streaming output and reporting
//! the exit status. External action references it does not recognize are
//! reported as `ActionNotFound`; the built-in control actions never reach
//! this runner.

use async_trait::async_trait;
use gantry_core::ports::{ActionOutcome, ActionRunner, StepInvocation};
use gantry_core::{Error, Result};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

#[derive(Debug, Clone, Default)]
pub struct ShellRunner {
    /// Shell binary used to run commands; defaults to `sh`.
    pub shell: Option<String>,
}

impl ShellRunner {
    pub fn new() -> Self {
        Self::default()
    }

    fn shell_binary(&self) -> &str {
        self.shell.as_deref().unwrap_or("sh")
    }
}

#[async_trait]
impl ActionRunner for ShellRunner {
    async fn invoke(&self, invocation: &StepInvocation) -> Result<ActionOutcome> {
        let Some(command) = &invocation.command else {
            let action = invocation
                .action
                .as_ref()
                .map(|a| a.action.clone())
                .unwrap_or_else(|| invocation.step_name.clone());
            return Err(Error::ActionNotFound(action));
        };

        let mut cmd = Command::new(self.shell_binary());
        cmd.arg("-c").arg(command);
        cmd.current_dir(&invocation.workspace);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        for (k, v) in &invocation.env {
            cmd.env(k, v);
        }

        let mut child = cmd.spawn()?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let stdout_handle = tokio::spawn(async move {
            let mut lines = Vec::new();
            if let Some(stdout) = stdout {
                let mut reader = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    tracing::debug!(line = %line, "stdout");
                    lines.push(line);
                }
            }
            lines
        });
        let stderr_handle = tokio::spawn(async move {
            let mut lines = Vec::new();
            if let Some(stderr) = stderr {
                let mut reader = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    tracing::debug!(line = %line, "stderr");
                    lines.push(line);
                }
            }
            lines
        });

        let status = child.wait().await?;
        let mut output = stdout_handle
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;
        output.extend(
            stderr_handle
                .await
                .map_err(|e| Error::Internal(e.to_string()))?,
        );

        Ok(ActionOutcome {
            success: status.success(),
            exit_code: status.code().unwrap_or(-1),
            output,
        })
    }
}
