use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

/// How long to wait for pipe readers after the process group was killed.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Stand-in deadline for limits too large to add to the clock.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// The owning job was cancelled while an external process was running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl std::fmt::Display for Cancelled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("cancelled")
    }
}

impl std::error::Error for Cancelled {}

#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

#[derive(Debug)]
pub enum RunError {
    /// The program could not be started at all.
    Spawn(std::io::Error),
    /// The wall-clock limit elapsed; the child was killed.
    TimedOut { stdout: String, stderr: String },
    Cancelled,
    Wait(std::io::Error),
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunError::Spawn(e) => write!(f, "failed to start process: {}", e),
            RunError::TimedOut { .. } => write!(f, "process timed out"),
            RunError::Cancelled => write!(f, "process cancelled"),
            RunError::Wait(e) => write!(f, "failed waiting for process: {}", e),
        }
    }
}

impl std::error::Error for RunError {}

enum Stop {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

/// Run `cmd` to completion, capturing both output streams in full.
///
/// The child leads its own process group. When `timeout` elapses or `cancel`
/// fires the whole group is killed, including helpers that outlive the direct
/// child while still holding its output pipes.
pub async fn run_bounded(
    mut cmd: Command,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<ProcessOutput, RunError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let now = Instant::now();
    let deadline = now.checked_add(timeout).unwrap_or(now + FAR_FUTURE);
    let mut child = cmd.spawn().map_err(RunError::Spawn)?;
    let group = child.id();
    let stdout = spawn_drain(child.stdout.take());
    let stderr = spawn_drain(child.stderr.take());
    let readers = [stdout.abort_handle(), stderr.abort_handle()];
    let output = async move {
        (
            stdout.await.unwrap_or_default(),
            stderr.await.unwrap_or_default(),
        )
    };
    tokio::pin!(output);

    let stop = tokio::select! {
        status = child.wait() => Stop::Exited(status),
        _ = sleep_until(deadline) => Stop::TimedOut,
        _ = cancel.cancelled() => Stop::Cancelled,
    };

    let stop = match stop {
        Stop::Exited(Ok(status)) => {
            // The pipes reach EOF only once every process holding them is gone.
            tokio::select! {
                (stdout, stderr) = &mut output => {
                    return Ok(ProcessOutput { status, stdout, stderr });
                }
                _ = sleep_until(deadline) => Stop::TimedOut,
                _ = cancel.cancelled() => Stop::Cancelled,
            }
        }
        other => other,
    };

    kill_group(&mut child, group).await;
    match stop {
        Stop::Exited(Err(e)) => {
            readers.iter().for_each(|r| r.abort());
            Err(RunError::Wait(e))
        }
        Stop::Cancelled => {
            readers.iter().for_each(|r| r.abort());
            Err(RunError::Cancelled)
        }
        _ => {
            let (stdout, stderr) = match tokio::time::timeout(DRAIN_GRACE, &mut output).await {
                Ok(captured) => captured,
                Err(_) => {
                    readers.iter().for_each(|r| r.abort());
                    (String::new(), String::new())
                }
            };
            Err(RunError::TimedOut { stdout, stderr })
        }
    }
}

/// SIGKILL every process in the child's group, then reap the child itself.
async fn kill_group(child: &mut Child, group: Option<u32>) {
    #[cfg(unix)]
    if let Some(pgid) = group.and_then(|id| i32::try_from(id).ok()) {
        use nix::errno::Errno;
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => tracing::warn!(pgid, error = %e, "Failed to kill process group"),
        }
    }
    #[cfg(not(unix))]
    let _ = group;

    if let Err(e) = child.kill().await {
        tracing::debug!(error = %e, "Child already reaped");
    }
}

fn spawn_drain<R>(reader: Option<R>) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut reader) = reader {
            if let Err(e) = reader.read_to_end(&mut buf).await {
                tracing::debug!(error = %e, "Output stream closed early");
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

/// Last `max_chars` characters of `text`.
pub fn tail(text: &str, max_chars: usize) -> &str {
    let count = text.chars().count();
    if count <= max_chars {
        return text;
    }
    let skip = count - max_chars;
    match text.char_indices().nth(skip) {
        Some((idx, _)) => &text[idx..],
        None => "",
    }
}

/// Combine the trailing parts of both streams into one diagnostic excerpt.
pub fn diagnostic_tail(stdout: &str, stderr: &str, max_chars: usize) -> Option<String> {
    let mut sections = Vec::new();
    let err = tail(stderr.trim_end(), max_chars);
    if !err.trim().is_empty() {
        sections.push(format!("[stderr]\n{}", err));
    }
    let out = tail(stdout.trim_end(), max_chars);
    if !out.trim().is_empty() {
        sections.push(format!("[stdout]\n{}", out));
    }
    if sections.is_empty() {
        None
    } else {
        Some(sections.join("\n"))
    }
}
