//! Subprocess Runner.
//!
//! A fresh child process per invocation, a curated environment (the
//! parent's environment is never leaked), a hard wall-clock timeout, and
//! graceful-then-forceful termination. No sandbox escalation (Seatbelt,
//! seccomp, landlock) — this runner only invokes a fixed, whitelisted
//! binary, so sandboxing the invoked tool's own process model is out of
//! scope here.

use std::collections::HashMap;
use std::io;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use hub_protocol::HubError;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::BufReader;
use tokio::process::Child;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::sync::Notify;
use tracing::warn;

/// A fully validated, positional argument vector and curated environment
/// for one invocation. Never built by shell interpretation or string
/// concatenation.
#[derive(Debug, Clone)]
pub struct ExecParams {
    pub program: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub timeout: Duration,
}

#[derive(Debug)]
pub struct RunnerOutput {
    pub exit_code: i32,
    pub signal: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub wall_time: Duration,
    pub output_truncated: bool,
}

/// One chunk of output produced while a streaming invocation runs, fed to
/// the Stream Multiplexer's producer side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputChannel {
    Stdout,
    Stderr,
}

#[derive(Debug)]
pub enum RunnerEvent {
    Output(OutputChannel, Vec<u8>),
    Exited { exit_code: i32, signal: Option<i32> },
    Timeout,
    Cancelled,
}

pub struct Runner {
    max_stdout_bytes: usize,
    max_stderr_bytes: usize,
}

impl Runner {
    pub fn new(max_stdout_bytes: usize, max_stderr_bytes: usize) -> Self {
        Self {
            max_stdout_bytes,
            max_stderr_bytes,
        }
    }

    fn spawn(&self, params: &ExecParams) -> io::Result<Child> {
        if params.program.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty program"));
        }
        let mut cmd = Command::new(&params.program);
        cmd.args(&params.args);
        // Curated environment only: the child never inherits the parent's
        // environment wholesale.
        cmd.env_clear();
        cmd.envs(&params.env);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        cmd.spawn()
    }

    /// Synchronous execution: buffers stdout/stderr into bounded vectors,
    /// enforces the timeout, and reaps the process either way.
    pub async fn run(
        &self,
        params: ExecParams,
        cancel: Arc<Notify>,
    ) -> Result<RunnerOutput, HubError> {
        let start = Instant::now();
        let mut child = self
            .spawn(&params)
            .map_err(|e| classify_spawn_error(&params.program, e))?;

        let stdout_reader = child
            .stdout
            .take()
            .ok_or_else(|| HubError::SpawnFailed("stdout pipe unavailable".into()))?;
        let stderr_reader = child
            .stderr
            .take()
            .ok_or_else(|| HubError::SpawnFailed("stderr pipe unavailable".into()))?;

        let stdout_handle = tokio::spawn(read_capped(BufReader::new(stdout_reader), self.max_stdout_bytes));
        let stderr_handle = tokio::spawn(read_capped(BufReader::new(stderr_reader), self.max_stderr_bytes));

        let interrupted = cancel.notified();
        let outcome = tokio::select! {
            result = tokio::time::timeout(params.timeout, child.wait()) => {
                match result {
                    Ok(Ok(status)) => Outcome::Exited(status),
                    Ok(Err(e)) => return Err(HubError::Io(e)),
                    Err(_) => {
                        terminate(&mut child, params_grace()).await;
                        Outcome::TimedOut
                    }
                }
            }
            _ = interrupted => {
                terminate(&mut child, params_grace()).await;
                Outcome::Cancelled
            }
        };

        let (stdout, stdout_truncated) = stdout_handle.await??;
        let (stderr, stderr_truncated) = stderr_handle.await??;
        let output_truncated = stdout_truncated || stderr_truncated;

        match outcome {
            Outcome::Exited(status) => Ok(RunnerOutput {
                exit_code: exit_code_of(&status),
                signal: signal_of(&status),
                stdout,
                stderr,
                wall_time: start.elapsed(),
                output_truncated,
            }),
            Outcome::TimedOut => Err(HubError::Timeout),
            Outcome::Cancelled => Err(HubError::Cancelled("runner cancelled".into())),
        }
    }

    /// Streaming execution: pumps stdout/stderr chunks to `sink` as they
    /// arrive instead of buffering, then sends a final `Exited`/`Timeout`/
    /// `Cancelled` event. The caller (the Stream Multiplexer) is
    /// responsible for framing these into sequenced `Frame`s.
    pub async fn run_streaming(
        &self,
        params: ExecParams,
        cancel: Arc<Notify>,
        sink: mpsc::Sender<RunnerEvent>,
    ) -> Result<(), HubError> {
        let mut child = self
            .spawn(&params)
            .map_err(|e| classify_spawn_error(&params.program, e))?;

        let stdout_reader = child
            .stdout
            .take()
            .ok_or_else(|| HubError::SpawnFailed("stdout pipe unavailable".into()))?;
        let stderr_reader = child
            .stderr
            .take()
            .ok_or_else(|| HubError::SpawnFailed("stderr pipe unavailable".into()))?;

        let stdout_sink = sink.clone();
        let stdout_task = tokio::spawn(pump(stdout_reader, OutputChannel::Stdout, stdout_sink));
        let stderr_sink = sink.clone();
        let stderr_task = tokio::spawn(pump(stderr_reader, OutputChannel::Stderr, stderr_sink));

        let interrupted = cancel.notified();
        tokio::select! {
            result = tokio::time::timeout(params.timeout, child.wait()) => {
                match result {
                    Ok(Ok(status)) => {
                        let _ = sink.send(RunnerEvent::Exited {
                            exit_code: exit_code_of(&status),
                            signal: signal_of(&status),
                        }).await;
                    }
                    Ok(Err(e)) => {
                        warn!(error = %e, "runner: wait() failed");
                        return Err(HubError::Io(e));
                    }
                    Err(_) => {
                        terminate(&mut child, params_grace()).await;
                        let _ = sink.send(RunnerEvent::Timeout).await;
                    }
                }
            }
            _ = interrupted => {
                terminate(&mut child, params_grace()).await;
                let _ = sink.send(RunnerEvent::Cancelled).await;
            }
        }

        let _ = stdout_task.await;
        let _ = stderr_task.await;
        Ok(())
    }
}

fn params_grace() -> Duration {
    Duration::from_secs(5)
}

enum Outcome {
    Exited(std::process::ExitStatus),
    TimedOut,
    Cancelled,
}

/// Send graceful termination, then forcible termination after the grace
/// interval; reap the process either way.
async fn terminate(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // SAFETY: `pid` is a valid, still-live process id owned by
            // `child`; sending SIGTERM is the standard graceful-shutdown
            // signal before escalating to SIGKILL below.
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
        }
    }
    #[cfg(not(unix))]
    let _ = child.start_kill();

    if tokio::time::timeout(grace, child.wait()).await.is_err() {
        let _ = child.start_kill();
        let _ = child.wait().await;
    }
}

fn exit_code_of(status: &std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

#[cfg(unix)]
fn signal_of(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn signal_of(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}

fn classify_spawn_error(program: &str, err: io::Error) -> HubError {
    match err.kind() {
        io::ErrorKind::NotFound => HubError::ExecFailed(format!("{program}: not found")),
        io::ErrorKind::PermissionDenied => {
            HubError::ExecFailed(format!("{program}: not executable"))
        }
        _ => HubError::SpawnFailed(format!("{program}: {err}")),
    }
}

async fn read_capped<R: AsyncRead + Unpin>(
    mut reader: R,
    max_bytes: usize,
) -> Result<(Vec<u8>, bool), HubError> {
    let mut buf = Vec::with_capacity(max_bytes.min(8 * 1024));
    let mut tmp = [0u8; 8192];
    let mut truncated = false;

    loop {
        let n = reader.read(&mut tmp).await?;
        if n == 0 {
            break;
        }
        if buf.len() < max_bytes {
            let remaining = max_bytes - buf.len();
            let copy_len = remaining.min(n);
            buf.extend_from_slice(&tmp[..copy_len]);
            if copy_len < n {
                truncated = true;
            }
        } else {
            truncated = true;
        }
        // Keep draining to EOF even once the cap is hit, so the child is
        // never blocked on a full pipe.
    }

    Ok((buf, truncated))
}

async fn pump(
    reader: impl tokio::io::AsyncRead + Unpin,
    channel: OutputChannel,
    sink: mpsc::Sender<RunnerEvent>,
) {
    let mut reader = BufReader::new(reader);
    let mut tmp = [0u8; 8192];
    loop {
        match reader.read(&mut tmp).await {
            Ok(0) => break,
            Ok(n) => {
                if sink
                    .send(RunnerEvent::Output(channel, tmp[..n].to_vec()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Err(_) => break,
        }
    }
}
