/// External tool runner.
///
/// Spawns one command, streams both stdout and stderr through a
/// [`ProgressMatcher`], and enforces a hard wall-clock timeout. The child
/// handle is owned here for the whole run: on timeout its process group is
/// killed and the child reaped before the error is returned.
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::errors::ToolError;
use crate::tool_output::ProgressMatcher;

/// A fully built command line for one pipeline stage.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    /// Display name used in logs and errors.
    pub tool: &'static str,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub timeout: Duration,
    /// Percent already reported before this stage started.
    pub progress_floor: f64,
}

impl ToolInvocation {
    pub fn new(tool: &'static str, program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            tool,
            program: program.into(),
            args,
            timeout: Duration::from_secs(300),
            progress_floor: 0.0,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_progress_floor(mut self, floor: f64) -> Self {
        self.progress_floor = floor;
        self
    }

    fn command_line(&self) -> String {
        format!("{} {}", self.program.display(), self.args.join(" "))
    }
}

/// A monotized progress value handed to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub percent: f64,
    pub message: String,
}

type Chunk = Result<String, std::io::Error>;

/// Run a tool to completion.
///
/// `on_progress` fires only when a matched percent rises above everything
/// reported so far (starting at `progress_floor`).
pub async fn run_tool<F>(
    invocation: &ToolInvocation,
    matcher: &dyn ProgressMatcher,
    mut on_progress: F,
) -> Result<(), ToolError>
where
    F: FnMut(ProgressUpdate),
{
    let tool = invocation.tool;
    info!("Running {}: {}", tool, invocation.command_line());

    let mut command = Command::new(&invocation.program);
    command
        .args(&invocation.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    // Own process group, so helpers the tool starts (yt-dlp runs ffmpeg for
    // audio extraction) can be killed along with it.
    #[cfg(unix)]
    command.process_group(0);

    let mut child = command
        .spawn()
        .map_err(|e| ToolError::LaunchFailed {
            tool,
            reason: format!("{}: {}", invocation.program.display(), e),
        })?;

    debug!("{} spawned (pid: {:?})", tool, child.id());

    let stdout = child.stdout.take().ok_or_else(|| ToolError::LaunchFailed {
        tool,
        reason: "no stdout handle".into(),
    })?;
    let stderr = child.stderr.take().ok_or_else(|| ToolError::LaunchFailed {
        tool,
        reason: "no stderr handle".into(),
    })?;

    let (chunk_tx, mut chunk_rx) = mpsc::unbounded_channel::<Chunk>();
    spawn_reader(stdout, chunk_tx.clone());
    spawn_reader(stderr, chunk_tx);

    let deadline = tokio::time::sleep(invocation.timeout);
    tokio::pin!(deadline);

    let mut highest = invocation.progress_floor;
    let mut exit: Option<ExitStatus> = None;
    let mut streams_open = true;

    while exit.is_none() || streams_open {
        tokio::select! {
            chunk = chunk_rx.recv(), if streams_open => match chunk {
                Some(Ok(text)) => {
                    if let Some(signal) = matcher.parse(&text) {
                        if signal.percent > highest {
                            highest = signal.percent;
                            on_progress(ProgressUpdate {
                                percent: signal.percent,
                                message: matcher.message(signal.percent),
                            });
                        }
                    } else if text.contains("WARNING") || text.contains("ERROR") {
                        warn!(target: "tool", "[{}] {}", tool, text);
                    } else {
                        debug!(target: "tool", "[{}] {}", tool, text);
                    }
                }
                Some(Err(e)) => {
                    terminate(&mut child, tool).await;
                    return Err(ToolError::LaunchFailed {
                        tool,
                        reason: format!("output stream error: {}", e),
                    });
                }
                None => streams_open = false,
            },
            status = child.wait(), if exit.is_none() => {
                let status = status.map_err(|e| ToolError::LaunchFailed {
                    tool,
                    reason: format!("wait failed: {}", e),
                })?;
                exit = Some(status);
            }
            _ = &mut deadline => {
                let secs = invocation.timeout.as_secs();
                warn!("{} exceeded {}s timeout, killing", tool, secs);
                terminate(&mut child, tool).await;
                return Err(ToolError::Timeout { tool, secs });
            }
        }
    }

    match exit {
        Some(status) if status.success() => {
            info!("{} completed successfully", tool);
            Ok(())
        }
        Some(status) => Err(ToolError::Failed { tool, code: status.code() }),
        None => Err(ToolError::LaunchFailed {
            tool,
            reason: "exit status unavailable".into(),
        }),
    }
}

/// Kill the child and its process group, then reap the child.
async fn terminate(child: &mut Child, tool: &str) {
    #[cfg(unix)]
    {
        if let Some(pgid) = child.id() {
            kill_process_group(pgid, tool).await;
        }
    }
    if let Err(e) = child.start_kill() {
        debug!("start_kill on {}: {}", tool, e);
    }
    match child.wait().await {
        Ok(status) => debug!("{} terminated: {}", tool, status),
        Err(e) => warn!("Error reaping {}: {}", tool, e),
    }
}

/// Signal the whole group through the shell's `kill` builtin; the child leads
/// its group, so its pid is the pgid.
#[cfg(unix)]
async fn kill_process_group(pgid: u32, tool: &str) {
    let status = Command::new("sh")
        .args(["-c", &format!("kill -9 -{}", pgid)])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    match status {
        Ok(status) if status.success() => debug!("Killed {} process group {}", tool, pgid),
        Ok(status) => warn!("kill for {} process group {} exited with {}", tool, pgid, status),
        Err(e) => warn!("Failed to run kill for {} process group {}: {}", tool, pgid, e),
    }
}

/// Forward output as `\r`/`\n` separated chunks until EOF.
fn spawn_reader<R>(mut stream: R, tx: mpsc::UnboundedSender<Chunk>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = [0u8; 4096];
        let mut pending = Vec::new();
        loop {
            match stream.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    for chunk in split_chunks(&mut pending, &buf[..n]) {
                        if tx.send(Ok(chunk)).is_err() {
                            return;
                        }
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(e));
                    return;
                }
            }
        }
        let rest = String::from_utf8_lossy(&pending).trim().to_string();
        if !rest.is_empty() {
            let _ = tx.send(Ok(rest));
        }
    });
}

/// Append `data` to `pending` and drain every complete chunk.
/// Empty chunks are dropped; an unterminated tail stays in `pending`.
fn split_chunks(pending: &mut Vec<u8>, data: &[u8]) -> Vec<String> {
    let mut chunks = Vec::new();
    for &byte in data {
        if byte == b'\n' || byte == b'\r' {
            let text = String::from_utf8_lossy(pending).trim().to_string();
            if !text.is_empty() {
                chunks.push(text);
            }
            pending.clear();
        } else {
            pending.push(byte);
        }
    }
    chunks
}
