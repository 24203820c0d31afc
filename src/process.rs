//! # External Tool Invocation
//!
//! Thin process-execution layer used by every cascade: resolve the tool,
//! spawn it with an argument list, capture stdout/stderr and enforce a hard
//! wall-clock deadline. Children are spawned with `kill_on_drop`, so when the
//! deadline elapses the pending wait is dropped and the process is killed.

use crate::error::CompressError;
use crate::tool_resolver::ToolPathResolver;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, warn};

const STDERR_TAIL: usize = 400;

/// Captured result of a finished process
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub status: i32,
    pub stdout: Vec<u8>,
    pub stderr: String,
    pub elapsed: Duration,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

/// Where the child's stdout goes
enum StdoutTarget<'a> {
    Capture,
    File(&'a Path),
}

/// Spawns external tools with deadlines
#[derive(Debug, Clone, Default)]
pub struct ToolRunner {
    resolver: ToolPathResolver,
}

impl ToolRunner {
    pub fn new(resolver: ToolPathResolver) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &ToolPathResolver {
        &self.resolver
    }

    pub fn resolve(&self, tool: &str) -> Option<PathBuf> {
        self.resolver.resolve_tool(tool)
    }

    /// Run a tool and require a zero exit status
    pub async fn run(&self, tool: &str, args: &[String], timeout: Duration) -> Result<ToolOutput, CompressError> {
        self.run_in(tool, args, None, timeout).await
    }

    /// Same as [`run`](Self::run) with an explicit working directory
    pub async fn run_in(
        &self,
        tool: &str,
        args: &[String],
        cwd: Option<&Path>,
        timeout: Duration,
    ) -> Result<ToolOutput, CompressError> {
        let output = self.execute(tool, args, cwd, StdoutTarget::Capture, timeout).await?;
        Self::require_success(tool, output)
    }

    /// Run a tool that writes its result to stdout, streaming it into `output_file`
    pub async fn run_to_file(
        &self,
        tool: &str,
        args: &[String],
        output_file: &Path,
        timeout: Duration,
    ) -> Result<ToolOutput, CompressError> {
        let output = self
            .execute(tool, args, None, StdoutTarget::File(output_file), timeout)
            .await?;
        Self::require_success(tool, output)
    }

    /// Run a tool and hand back whatever it produced, whatever the exit status
    pub async fn capture(&self, tool: &str, args: &[String], timeout: Duration) -> Result<ToolOutput, CompressError> {
        self.execute(tool, args, None, StdoutTarget::Capture, timeout).await
    }

    async fn execute(
        &self,
        tool: &str,
        args: &[String],
        cwd: Option<&Path>,
        stdout: StdoutTarget<'_>,
        timeout: Duration,
    ) -> Result<ToolOutput, CompressError> {
        let program = self
            .resolver
            .resolve_tool(tool)
            .ok_or_else(|| CompressError::BackendUnavailable(tool.to_string()))?;

        let mut cmd = Command::new(&program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        match stdout {
            StdoutTarget::Capture => {
                cmd.stdout(Stdio::piped());
            }
            StdoutTarget::File(path) => {
                let file = std::fs::File::create(path)?;
                cmd.stdout(Stdio::from(file));
            }
        }
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        debug!("Running {} {}", program.display(), args.join(" "));
        let start = Instant::now();
        let child = cmd
            .spawn()
            .map_err(|e| CompressError::BackendUnavailable(format!("{}: {}", tool, e)))?;

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                warn!("{} killed after exceeding {:?}", tool, timeout);
                return Err(CompressError::BackendTimeout {
                    backend: tool.to_string(),
                    timeout,
                });
            }
        };

        Ok(ToolOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: output.stdout,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            elapsed: start.elapsed(),
        })
    }

    fn require_success(tool: &str, output: ToolOutput) -> Result<ToolOutput, CompressError> {
        if output.success() {
            debug!("{} finished in {:.2}s", tool, output.elapsed.as_secs_f64());
            return Ok(output);
        }
        let stderr = output.stderr.trim();
        let tail = match stderr.char_indices().rev().nth(STDERR_TAIL) {
            Some((idx, _)) => &stderr[idx..],
            None => stderr,
        };
        Err(CompressError::ToolFailed {
            tool: tool.to_string(),
            status: output.status,
            stderr: tail.to_string(),
        })
    }
}
