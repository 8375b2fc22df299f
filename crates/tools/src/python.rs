//! Python tool — executes model-written scripts.
//!
//! The call content is the script itself (no JSON wrapper). With the default
//! docker runner it is fed to `docker run -i --rm {image} python -` on
//! stdin; the native runner pipes it straight into the host's `python3` for
//! trusted environments. Combined stdout/stderr comes back as the tool
//! output. Failures and timeouts are textual output, never errors — the
//! model reads them and adjusts.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use colloquy_core::{Message, ToolCapability, ToolClass, ToolError};

/// How scripts are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PythonRunner {
    /// Containerized via `docker run` (the default)
    Docker,
    /// Host `python3` directly; only for trusted environments
    Native,
}

pub struct PythonCapability {
    image: String,
    runner: PythonRunner,
    timeout: Duration,
}

impl PythonCapability {
    pub fn new(image: &str, timeout_secs: u64) -> Self {
        Self::with_runner(image, PythonRunner::Docker, timeout_secs)
    }

    pub fn with_runner(image: &str, runner: PythonRunner, timeout_secs: u64) -> Self {
        Self {
            image: image.to_string(),
            runner,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    fn command(&self) -> Command {
        match self.runner {
            PythonRunner::Docker => {
                let mut cmd = Command::new("docker");
                cmd.args(["run", "-i", "--rm", &self.image, "python", "-"]);
                cmd
            }
            PythonRunner::Native => {
                let mut cmd = Command::new("python3");
                cmd.arg("-");
                cmd
            }
        }
    }

    async fn run_script(&self, script: &str) -> Result<String, ToolError> {
        debug!(
            image = %self.image,
            runner = ?self.runner,
            script_len = script.len(),
            "Running python script"
        );

        let mut child = self
            .command()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "python".into(),
                reason: format!("failed to start interpreter: {e}"),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(script.as_bytes())
                .await
                .map_err(|e| ToolError::ExecutionFailed {
                    tool_name: "python".into(),
                    reason: format!("failed to write script: {e}"),
                })?;
            // Close stdin so the interpreter sees EOF
        }

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| ToolError::ExecutionFailed {
                tool_name: "python".into(),
                reason: e.to_string(),
            })?,
            Err(_) => {
                warn!(timeout_secs = self.timeout.as_secs(), "Python script timed out");
                return Ok(format!(
                    "Error: script timed out after {}s",
                    self.timeout.as_secs()
                ));
            }
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            combined.push_str(&stderr);
        }
        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            combined.push_str(&format!("\n[exit code: {code}]"));
        }

        Ok(combined)
    }
}

#[async_trait]
impl ToolCapability for PythonCapability {
    fn class(&self) -> ToolClass {
        ToolClass::Python
    }

    async fn invoke(&self, call: &Message) -> Result<Vec<String>, ToolError> {
        let output = self.run_script(&call.text()).await?;
        Ok(vec![output])
    }
}
