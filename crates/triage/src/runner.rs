//! Spawns analyzer subprocesses and collects their output.
//!
//! The contract is deliberately small: feed one JSON document to stdin,
//! read stdout and stderr to the end, wait for exit. Correctness is
//! judged from the output document, not the exit code.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

use crate::error::ExecutionError;

/// Grace period for process exit once both output streams are closed.
const WAIT_GRACE: Duration = Duration::from_secs(5);

/// Everything captured from one analyzer run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    /// Exit code; `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: String,
    /// True when stdout hit the capture cap and was truncated.
    pub stdout_capped: bool,
}

#[derive(Debug, Clone)]
pub struct Runner {
    max_output_bytes: usize,
    timeout: Option<Duration>,
}

impl Runner {
    pub fn new(max_output_bytes: usize, timeout: Option<Duration>) -> Self {
        Self {
            max_output_bytes,
            timeout,
        }
    }

    /// Runs `command` in `working_directory`, writes `input` to its
    /// stdin and returns the captured streams and exit code.
    ///
    /// stdin write and both stream reads run concurrently so the child
    /// cannot deadlock on a full pipe. When a timeout is configured the
    /// whole I/O sequence races against it and a late child is killed.
    pub async fn run(
        &self,
        command: &Path,
        working_directory: &Path,
        input: &str,
    ) -> Result<RunOutput, ExecutionError> {
        let span = tracing::info_span!("runner.run", command = %command.display());
        let _guard = span.enter();

        let mut cmd = shell_command(command);
        cmd.current_dir(working_directory)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        drop(_guard);

        let mut child = cmd.spawn().map_err(|e| ExecutionError::Spawn {
            command: command.display().to_string(),
            source: e,
        })?;

        // The handles exist because all three streams are piped.
        let mut stdin = child.stdin.take();
        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();

        let input_bytes = input.as_bytes().to_vec();
        let cap = self.max_output_bytes;

        let io = async {
            let write_stdin = async {
                if let Some(stdin) = stdin.as_mut() {
                    // A child that exits without reading closes the pipe;
                    // its output still decides the job, so keep going.
                    if let Err(e) = stdin.write_all(&input_bytes).await {
                        log::debug!("Analyzer stopped reading stdin: {}", e);
                    }
                }
                drop(stdin.take());
            };
            let read_stdout = async {
                match stdout.as_mut() {
                    Some(stream) => drain_capped(stream, cap).await,
                    None => (Vec::new(), false),
                }
            };
            let read_stderr = async {
                match stderr.as_mut() {
                    Some(stream) => drain_capped(stream, cap).await,
                    None => (Vec::new(), false),
                }
            };

            let (_, out, err) = tokio::join!(write_stdin, read_stdout, read_stderr);
            (out, err)
        };

        let ((stdout, stdout_capped), (stderr, _)) = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, io).await {
                Ok(captured) => captured,
                Err(_elapsed) => {
                    let _ = child.kill().await;
                    return Err(ExecutionError::Timeout(limit.as_secs()));
                }
            },
            None => io.await,
        };

        // Streams are closed; the child should exit promptly.
        let status = match tokio::time::timeout(WAIT_GRACE, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                return Err(ExecutionError::Spawn {
                    command: command.display().to_string(),
                    source: e,
                })
            }
            Err(_elapsed) => {
                let _ = child.kill().await;
                return Err(ExecutionError::Timeout(WAIT_GRACE.as_secs()));
            }
        };

        Ok(RunOutput {
            exit_code: status.code(),
            stdout,
            stderr: String::from_utf8_lossy(&stderr).to_string(),
            stdout_capped,
        })
    }
}

/// Wraps the analyzer path in a shell so script analyzers work without
/// a shebang lookup on every platform. The path must not contain
/// shell-active characters; the registry is operator-controlled.
fn shell_command(path: &Path) -> Command {
    #[cfg(windows)]
    {
        let mut cmd = Command::new("cmd");
        cmd.arg("/c").arg(path);
        cmd
    }
    #[cfg(not(windows))]
    {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(path);
        cmd
    }
}

/// Reads a stream to the end, keeping at most `cap` bytes. The rest is
/// drained and discarded so the child never blocks on a full pipe.
async fn drain_capped<R: tokio::io::AsyncRead + Unpin>(reader: &mut R, cap: usize) -> (Vec<u8>, bool) {
    let mut bytes = Vec::new();
    let mut buf = [0u8; 4096];
    let mut capped = false;
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if capped {
                    continue;
                }
                if bytes.len() + n > cap {
                    let keep = cap - bytes.len();
                    bytes.extend_from_slice(&buf[..keep]);
                    log::warn!("Analyzer output exceeded {} bytes, truncated", cap);
                    capped = true;
                    continue;
                }
                bytes.extend_from_slice(&buf[..n]);
            }
            Err(e) => {
                log::warn!("Failed to read analyzer output: {}", e);
                break;
            }
        }
    }
    (bytes, capped)
}
