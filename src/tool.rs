//! External tool invocation
//!
//! Every process wgprov starts (`wg`, the elevated copy, the elevated
//! remove) goes through [`ToolRunner`]. Commands are configured as an argv
//! prefix, so privilege elevation is just a leading `sudo`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::ToolError;
use crate::validation;

/// Program plus leading arguments, e.g. `["sudo", "wg"]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolCommand(Vec<String>);

impl ToolCommand {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(argv.into_iter().map(Into::into).collect())
    }

    pub fn program(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    pub fn base_args(&self) -> &[String] {
        self.0.get(1..).unwrap_or(&[])
    }

    /// Human-readable command line, used in logs and errors
    pub fn describe(&self, args: &[String]) -> String {
        self.0
            .iter()
            .chain(args.iter())
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured output of a successful invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Runs external commands
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Run `command` followed by `args`
    ///
    /// When `stdin` is given it is streamed to the child and the pipe is
    /// closed afterwards. A non-zero exit is an error.
    async fn run(
        &self,
        command: &ToolCommand,
        args: &[String],
        stdin: Option<Vec<u8>>,
    ) -> Result<ToolOutput, ToolError>;
}

/// [`ToolRunner`] backed by `tokio::process`
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    timeout: Duration,
}

impl ProcessRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl ToolRunner for ProcessRunner {
    async fn run(
        &self,
        command: &ToolCommand,
        args: &[String],
        stdin: Option<Vec<u8>>,
    ) -> Result<ToolOutput, ToolError> {
        let program = command.program().ok_or(ToolError::EmptyCommand)?;
        let described = command.describe(args);
        debug!("Running {}", described);

        let mut child = Command::new(program)
            .args(command.base_args())
            .args(args)
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ToolError::Spawn {
                command: described.clone(),
                source,
            })?;

        // The writer runs on its own task so a child that fills its stdout
        // before draining stdin cannot deadlock against us.
        let writer = match stdin {
            Some(input) => {
                let mut pipe = child.stdin.take().ok_or_else(|| ToolError::Spawn {
                    command: described.clone(),
                    source: io::Error::new(io::ErrorKind::BrokenPipe, "stdin pipe unavailable"),
                })?;
                Some(tokio::spawn(async move {
                    pipe.write_all(&input).await?;
                    pipe.shutdown().await?;
                    drop(pipe);
                    Ok::<(), io::Error>(())
                }))
            }
            None => None,
        };

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|source| ToolError::Spawn {
                command: described.clone(),
                source,
            })?,
            Err(_) => {
                warn!("{} timed out after {:?}, killing it", described, self.timeout);
                if let Some(writer) = writer {
                    writer.abort();
                }
                return Err(ToolError::TimedOut {
                    command: described,
                    timeout: self.timeout,
                });
            }
        };

        if !output.status.success() {
            return Err(ToolError::Failed {
                command: described,
                code: output.status.code(),
                stderr: validation::sanitize_error_message(&String::from_utf8_lossy(&output.stderr)),
            });
        }

        if let Some(writer) = writer {
            let written = writer
                .await
                .unwrap_or_else(|join_err| Err(io::Error::other(join_err)));
            if let Err(source) = written {
                return Err(ToolError::Stdin {
                    command: described,
                    source,
                });
            }
        }

        debug!("{} finished ({} bytes of output)", described, output.stdout.len());
        Ok(ToolOutput {
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}
