// External command runner
//
// Collaborators that live outside the process (PDF renderer, Pohoda/ISDOC
// exporters, OCR engine) are invoked as child processes: input on stdin,
// JSON answer on stdout. The child sees only allowlisted environment
// variables plus what the caller passes explicitly.

use fakturace_core::error::AppError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// How long a timed-out child gets between SIGTERM and SIGKILL
const TERMINATION_GRACE: Duration = Duration::from_secs(2);

/// Variables inherited from the parent environment by default
const DEFAULT_ENV_ALLOWLIST: &[&str] = &["PATH", "HOME", "LANG", "TMPDIR"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Failed to spawn {program}: {reason}")]
    SpawnFailed { program: String, reason: String },

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Timed out after {0}ms")]
    Timeout(u64),

    #[error("Exited with status {code:?}: {stderr}")]
    NonZeroExit { code: Option<i32>, stderr: String },

    #[error("Invalid output: {0}")]
    InvalidOutput(String),
}

impl From<ExecutionError> for AppError {
    fn from(e: ExecutionError) -> Self {
        AppError::Collaborator(e.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct CommandRunner {
    program: String,
    args: Vec<String>,
    env_allowlist: Vec<String>,
    timeout: Duration,
}

impl CommandRunner {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            env_allowlist: DEFAULT_ENV_ALLOWLIST.iter().map(|s| s.to_string()).collect(),
            timeout,
        }
    }

    /// Split a whitespace separated command line (`"render-pdf --a4"`)
    pub fn from_command_line(line: &str, timeout: Duration) -> Result<Self, ExecutionError> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| ExecutionError::InvalidCommand("empty command line".to_string()))?;
        Ok(Self::new(program, parts.collect(), timeout))
    }

    pub fn with_env_allowlist(mut self, allowlist: Vec<String>) -> Self {
        self.env_allowlist = allowlist;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn inherited_env(&self) -> Vec<(String, String)> {
        std::env::vars()
            .filter(|(k, _)| self.env_allowlist.contains(k))
            .collect()
    }

    /// Run once with `input` on stdin, returning stdout
    pub async fn run(
        &self,
        input: &[u8],
        extra_env: &[(&str, String)],
    ) -> Result<Vec<u8>, ExecutionError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .env_clear()
            .envs(self.inherited_env())
            .envs(extra_env.iter().map(|(k, v)| (*k, v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(not(unix))]
        command.kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| ExecutionError::SpawnFailed {
            program: self.program.clone(),
            reason: e.to_string(),
        })?;
        let pid = child.id();
        debug!(program = %self.program, pid = ?pid, "Command started");

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| ExecutionError::Io("stdin was not captured".to_string()))?;
        let payload = input.to_vec();
        // Fed concurrently with draining stdout so large answers cannot block
        let writer = tokio::spawn(async move {
            stdin.write_all(&payload).await?;
            stdin.shutdown().await
        });

        let timeout_ms = self.timeout.as_millis() as u64;
        match timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                // Commands that ignore stdin close it early; that is not an error
                let _ = writer.await;
                if !output.status.success() {
                    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                    warn!(program = %self.program, code = ?output.status.code(), "Command failed");
                    return Err(ExecutionError::NonZeroExit {
                        code: output.status.code(),
                        stderr,
                    });
                }
                Ok(output.stdout)
            }
            Ok(Err(e)) => Err(ExecutionError::Io(e.to_string())),
            Err(_) => {
                writer.abort();
                warn!(program = %self.program, timeout_ms = timeout_ms, "Command timed out");
                if let Some(pid) = pid {
                    terminate(pid).await;
                }
                Err(ExecutionError::Timeout(timeout_ms))
            }
        }
    }

    /// Serialize `input` to stdin and parse stdout as JSON
    pub async fn run_json<I, O>(
        &self,
        input: &I,
        extra_env: &[(&str, String)],
    ) -> Result<O, ExecutionError>
    where
        I: Serialize + ?Sized,
        O: DeserializeOwned,
    {
        let body = serde_json::to_vec(input).map_err(|e| ExecutionError::Io(e.to_string()))?;
        let stdout = self.run(&body, extra_env).await?;
        serde_json::from_slice(&stdout).map_err(|e| ExecutionError::InvalidOutput(e.to_string()))
    }
}

/// SIGTERM first, SIGKILL once the grace period ran out
#[cfg(unix)]
async fn terminate(pid: u32) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let pid = Pid::from_raw(pid as i32);
    info!(pid = %pid, "Sending SIGTERM to timed out command");
    if kill(pid, Signal::SIGTERM).is_err() {
        // Already gone
        return;
    }

    let deadline = tokio::time::Instant::now() + TERMINATION_GRACE;
    while tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if kill(pid, None::<Signal>).is_err() {
            return;
        }
    }

    warn!(pid = %pid, "Command ignored SIGTERM, sending SIGKILL");
    let _ = kill(pid, Signal::SIGKILL);
}

#[cfg(not(unix))]
async fn terminate(_pid: u32) {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn sh(script: &str, timeout: Duration) -> CommandRunner {
        CommandRunner::new("sh", vec!["-c".to_string(), script.to_string()], timeout)
    }

    #[tokio::test]
    async fn test_stdin_is_forwarded() {
        let runner = CommandRunner::new("cat", vec![], Duration::from_secs(5));
        let out = runner.run(b"invoice", &[]).await.unwrap();
        assert_eq!(out, b"invoice");
    }

    #[tokio::test]
    async fn test_run_json_round_trip() {
        let runner = CommandRunner::new("cat", vec![], Duration::from_secs(5));
        let out: Value = runner
            .run_json(&json!({"location": "file://pdf/1.pdf"}), &[])
            .await
            .unwrap();
        assert_eq!(out["location"], json!("file://pdf/1.pdf"));
    }

    #[tokio::test]
    async fn test_non_zero_exit_reports_stderr() {
        let runner = sh("echo 'template missing' >&2; exit 3", Duration::from_secs(5));
        let err = runner.run(b"", &[]).await.unwrap_err();
        assert_eq!(
            err,
            ExecutionError::NonZeroExit {
                code: Some(3),
                stderr: "template missing".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_timeout() {
        let runner = sh("sleep 10", Duration::from_millis(100));
        let err = runner.run(b"", &[]).await.unwrap_err();
        assert_eq!(err, ExecutionError::Timeout(100));
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let runner = CommandRunner::new("/nonexistent/renderer", vec![], Duration::from_secs(1));
        let err = runner.run(b"", &[]).await.unwrap_err();
        assert!(matches!(err, ExecutionError::SpawnFailed { .. }));
    }

    #[tokio::test]
    async fn test_environment_is_filtered() {
        let runner = sh("printf '%s|%s' \"$FAKTURACE_OCR_FILENAME\" \"$HOME\"", Duration::from_secs(5))
            .with_env_allowlist(vec!["PATH".to_string()]);
        let out = runner
            .run(b"", &[("FAKTURACE_OCR_FILENAME", "scan.pdf".to_string())])
            .await
            .unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "scan.pdf|");
    }

    #[test]
    fn test_from_command_line() {
        let runner = CommandRunner::from_command_line("render-pdf --a4  --lang cs", Duration::from_secs(1))
            .unwrap();
        assert_eq!(runner.program(), "render-pdf");
        assert_eq!(runner.args, vec!["--a4", "--lang", "cs"]);
        assert!(CommandRunner::from_command_line("   ", Duration::from_secs(1)).is_err());
    }
}
