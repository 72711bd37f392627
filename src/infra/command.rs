//! # Process Runner Module / 进程运行模块
//!
//! This module launches external commands, captures their output streams and
//! enforces timeout, force-success and error-marker semantics. It keeps a
//! registry of live subprocesses so the whole orchestration can be torn down
//! when a fatal error or a shutdown signal arrives.
//!
//! 此模块负责启动外部命令，捕获其输出流，并实现超时、强制成功和错误标记语义。
//! 它维护一个存活子进程的注册表，以便在致命错误或关闭信号到来时拆除整个编排。

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use anyhow::Context;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use crate::infra::logger::Logger;

/// Line appended to captured stderr when a subprocess is killed on timeout.
pub const TERMINATED_MARKER: &str = "[process terminated: timeout]";

/// Describes one external command invocation.
#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub current_dir: Option<PathBuf>,
    /// When `true`, exit-code and error-marker failures are rewritten as
    /// success and the captured output is returned as-is.
    pub force: bool,
    pub timeout: Option<Duration>,
    /// When set, the presence of this text anywhere in the captured output
    /// fails the command even on a zero exit code.
    pub error_marker: Option<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    /// Builds a spec from a configured shell command line, expanding
    /// environment variables and splitting it into program and arguments.
    pub fn shell(command_line: &str) -> anyhow::Result<Self> {
        let expanded = shellexpand::full(command_line)
            .with_context(|| format!("Failed to expand command: {command_line}"))?
            .to_string();

        let parts = shlex::split(&expanded)
            .ok_or_else(|| anyhow::anyhow!("Failed to parse command: {}", expanded))?;

        if parts.is_empty() {
            return Err(anyhow::anyhow!("Empty command after parsing."));
        }

        let mut spec = Self::new(parts[0].clone());
        spec.args = parts[1..].to_vec();
        Ok(spec)
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn error_marker(mut self, marker: impl Into<String>) -> Self {
        self.error_marker = Some(marker.into());
        self
    }

    /// The full command line, for logging.
    pub fn command_line(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// Captured output of a finished subprocess.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    /// stdout followed by stderr as a single string.
    pub fn merged(&self) -> String {
        self.stdout
            .iter()
            .chain(self.stderr.iter())
            .cloned()
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.stdout.iter().any(|line| line.contains(needle))
            || self.stderr.iter().any(|line| line.contains(needle))
    }
}

/// Failure modes of a subprocess invocation.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to run `{program}`: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` exited with status {code:?}")]
    Failed {
        command: String,
        code: Option<i32>,
        output: CommandOutput,
    },
    #[error("`{command}` emitted error marker `{marker}`")]
    MarkerFound {
        command: String,
        marker: String,
        output: CommandOutput,
    },
    #[error("`{command}` terminated after {}s timeout", .timeout.as_secs())]
    Timeout {
        command: String,
        timeout: Duration,
        output: CommandOutput,
    },
    #[error("`{command}` was terminated during shutdown")]
    Killed {
        command: String,
        output: CommandOutput,
    },
}

impl ProcessError {
    /// Partial output captured before the failure, when any.
    pub fn output(&self) -> Option<&CommandOutput> {
        match self {
            ProcessError::Io { .. } => None,
            ProcessError::Failed { output, .. }
            | ProcessError::MarkerFound { output, .. }
            | ProcessError::Timeout { output, .. }
            | ProcessError::Killed { output, .. } => Some(output),
        }
    }
}

/// The seam between orchestration components and the operating system.
/// Production code uses [`ProcessRunner`]; tests substitute scripted fakes.
pub trait CommandRunner: Send + Sync {
    fn run(
        &self,
        spec: CommandSpec,
    ) -> impl Future<Output = Result<CommandOutput, ProcessError>> + Send;
}

/// Registry of live subprocesses. Finished processes remove their own entry
/// concurrently with bulk-kill sweeps; duplicate removals are last-writer-wins.
#[derive(Default)]
struct ProcessRegistry {
    live: StdMutex<HashMap<u64, CancellationToken>>,
    next_id: AtomicU64,
}

impl ProcessRegistry {
    fn register(&self) -> (u64, CancellationToken) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        self.live
            .lock()
            .expect("process registry poisoned")
            .insert(id, token.clone());
        (id, token)
    }

    fn deregister(&self, id: u64) {
        self.live
            .lock()
            .expect("process registry poisoned")
            .remove(&id);
    }

    /// Cancels every registered process. Tokens are collected under the lock
    /// and cancelled outside it, so removal by a finishing process never
    /// races the sweep while the lock is held.
    fn cancel_all(&self) -> usize {
        let tokens: Vec<CancellationToken> = self
            .live
            .lock()
            .expect("process registry poisoned")
            .values()
            .cloned()
            .collect();
        for token in &tokens {
            token.cancel();
        }
        tokens.len()
    }
}

/// Production [`CommandRunner`] backed by `tokio::process`.
pub struct ProcessRunner {
    logger: Arc<Logger>,
    registry: ProcessRegistry,
}

enum WaitOutcome {
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut,
    Cancelled,
}

impl ProcessRunner {
    pub fn new(logger: Arc<Logger>) -> Self {
        Self {
            logger,
            registry: ProcessRegistry::default(),
        }
    }

    /// Best-effort teardown of every still-running subprocess.
    pub fn kill_all(&self) {
        let count = self.registry.cancel_all();
        if count > 0 {
            self.logger
                .warn(format!("Terminating {} running subprocess(es)", count));
        }
    }

    async fn execute(&self, spec: &CommandSpec) -> Result<CommandOutput, ProcessError> {
        let command_line = spec.command_line();
        self.logger.command(&command_line);

        let mut cmd = tokio::process::Command::new(&spec.program);
        cmd.args(&spec.args)
            .kill_on_drop(true)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &spec.current_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| ProcessError::Io {
            program: spec.program.clone(),
            source: e,
        })?;

        let stdout = child.stdout.take().ok_or_else(|| ProcessError::Io {
            program: spec.program.clone(),
            source: std::io::Error::other("Failed to capture stdout"),
        })?;
        let stderr = child.stderr.take().ok_or_else(|| ProcessError::Io {
            program: spec.program.clone(),
            source: std::io::Error::other("Failed to capture stderr"),
        })?;

        // One collector per stream; the reader tasks are joined before the
        // output is assembled so no trailing lines are lost.
        let stdout_lines = Arc::new(tokio::sync::Mutex::new(Vec::<String>::new()));
        let stderr_lines = Arc::new(tokio::sync::Mutex::new(Vec::<String>::new()));

        let stdout_collector = Arc::clone(&stdout_lines);
        let stdout_handle = tokio::spawn(async move {
            let reader = BufReader::new(stdout);
            let mut lines = reader.lines();
            while let Ok(Some(line)) = lines.next_line().await {
                stdout_collector.lock().await.push(line);
            }
        });

        let stderr_collector = Arc::clone(&stderr_lines);
        let stderr_handle = tokio::spawn(async move {
            let reader = BufReader::new(stderr);
            let mut lines = reader.lines();
            while let Ok(Some(line)) = lines.next_line().await {
                stderr_collector.lock().await.push(line);
            }
        });

        let (id, token) = self.registry.register();

        let outcome = if let Some(timeout) = spec.timeout {
            tokio::select! {
                status = child.wait() => WaitOutcome::Exited(status),
                _ = tokio::time::sleep(timeout) => WaitOutcome::TimedOut,
                _ = token.cancelled() => WaitOutcome::Cancelled,
            }
        } else {
            tokio::select! {
                status = child.wait() => WaitOutcome::Exited(status),
                _ = token.cancelled() => WaitOutcome::Cancelled,
            }
        };

        if matches!(outcome, WaitOutcome::TimedOut | WaitOutcome::Cancelled) {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }

        if let Err(e) = stdout_handle.await {
            self.logger.warn(format!("Failed to join stdout task: {}", e));
        }
        if let Err(e) = stderr_handle.await {
            self.logger.warn(format!("Failed to join stderr task: {}", e));
        }

        self.registry.deregister(id);

        let mut output = CommandOutput {
            stdout: stdout_lines.lock().await.clone(),
            stderr: stderr_lines.lock().await.clone(),
            exit_code: None,
        };

        match outcome {
            WaitOutcome::TimedOut => {
                output.stderr.push(TERMINATED_MARKER.to_string());
                Err(ProcessError::Timeout {
                    command: command_line,
                    timeout: spec.timeout.unwrap_or_default(),
                    output,
                })
            }
            WaitOutcome::Cancelled => Err(ProcessError::Killed {
                command: command_line,
                output,
            }),
            WaitOutcome::Exited(Err(e)) => Err(ProcessError::Io {
                program: spec.program.clone(),
                source: e,
            }),
            WaitOutcome::Exited(Ok(status)) => {
                output.exit_code = status.code();

                if let Some(marker) = &spec.error_marker {
                    if output.contains(marker) {
                        return if spec.force {
                            Ok(output)
                        } else {
                            Err(ProcessError::MarkerFound {
                                command: command_line,
                                marker: marker.clone(),
                                output,
                            })
                        };
                    }
                }

                if status.success() || spec.force {
                    Ok(output)
                } else {
                    Err(ProcessError::Failed {
                        command: command_line,
                        code: status.code(),
                        output,
                    })
                }
            }
        }
    }
}

impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: CommandSpec) -> Result<CommandOutput, ProcessError> {
        self.execute(&spec).await
    }
}
