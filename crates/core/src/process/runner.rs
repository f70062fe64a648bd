//! Tokio-backed subprocess runner.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::types::{Invocation, ProcessError, ProcessOutput};

/// Runs an external program and captures its output.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion or until the invocation's timeout elapses.
    ///
    /// A non-zero exit is not an error here; inspect [`ProcessOutput::exit_code`].
    async fn run(&self, invocation: &Invocation) -> Result<ProcessOutput, ProcessError>;
}

/// Spawns real processes with `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioCommandRunner;

impl TokioCommandRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for TokioCommandRunner {
    async fn run(&self, invocation: &Invocation) -> Result<ProcessOutput, ProcessError> {
        debug!("Running: {}", invocation.command_line());

        let io_err = |source: std::io::Error| ProcessError::Io {
            program: invocation.program.clone(),
            source,
        };

        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ProcessError::NotFound {
                        program: invocation.program.clone(),
                    }
                } else {
                    io_err(e)
                }
            })?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| io_err(std::io::Error::other("stdout not captured")))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| io_err(std::io::Error::other("stderr not captured")))?;

        // Drain both pipes concurrently so a chatty child cannot block on a full pipe.
        let collect = async {
            let mut out = Vec::new();
            let mut err = Vec::new();
            let (out_read, err_read) =
                tokio::join!(stdout.read_to_end(&mut out), stderr.read_to_end(&mut err));
            out_read?;
            err_read?;
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((status, out, err))
        };

        let result = timeout(invocation.timeout, collect).await;
        match result {
            Ok(Ok((status, out, err))) => Ok(ProcessOutput {
                exit_code: status.code(),
                stdout: String::from_utf8_lossy(&out).into_owned(),
                stderr: String::from_utf8_lossy(&err).into_owned(),
            }),
            Ok(Err(e)) => Err(io_err(e)),
            Err(_) => {
                warn!(
                    "{} exceeded {}s, killing",
                    invocation.program.display(),
                    invocation.timeout.as_secs()
                );
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill timed out process: {}", e);
                }
                Err(ProcessError::Timeout {
                    program: invocation.program.clone(),
                    timeout_secs: invocation.timeout.as_secs(),
                })
            }
        }
    }
}
