//! Process runner -- spawn the external test command, stream stdout as it
//! arrives, enforce the wall-clock ceiling.
//!
//! The runner never fails to its caller: spawn errors and timeouts are
//! folded into a [`ProcessOutput`] with `exit_code = 1` so whatever partial
//! output exists can still be summarised.

pub mod command;

use std::process::Stdio;
use std::time::Duration;

use serde::Serialize;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

pub use self::command::{count_listed_tests, RunnerCommand};

/// Bytes requested per stdout read.
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// How long to wait for stderr to drain once the child is gone.
const STDERR_GRACE: Duration = Duration::from_secs(2);

/// How the child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessOutcome {
    /// The child ran and exited (any exit code).
    Exited,
    /// The child was killed after exceeding its timeout.
    TimedOut,
    /// The child could not be started at all.
    SpawnFailed,
}

/// Everything the runner collected.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// Stdout, then stderr, then any runner-side error message.
    pub combined_output: String,
    pub exit_code: i32,
    pub outcome: ProcessOutcome,
}

impl ProcessOutput {
    fn spawn_failed(message: String) -> Self {
        Self {
            combined_output: message,
            exit_code: 1,
            outcome: ProcessOutcome::SpawnFailed,
        }
    }
}

/// Run `cmd` to completion, handing every decoded stdout chunk to
/// `on_stdout` as soon as it is read.
///
/// Chunks follow read boundaries, not line boundaries.
pub async fn run_streaming<F>(cmd: &RunnerCommand, mut on_stdout: F) -> ProcessOutput
where
    F: FnMut(&str),
{
    info!(
        program = %cmd.program,
        args = ?cmd.args,
        cwd = %cmd.cwd.display(),
        timeout_sec = cmd.timeout.as_secs(),
        "spawning runner"
    );

    let mut child = match Command::new(&cmd.program)
        .args(&cmd.args)
        .current_dir(&cmd.cwd)
        .envs(&cmd.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            let message = format!("failed to spawn '{}': {}", cmd.program, e);
            warn!(program = %cmd.program, error = %e, "runner spawn failed");
            return ProcessOutput::spawn_failed(message);
        }
    };

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let mut stderr_task = tokio::spawn(async move {
        let mut bytes = Vec::new();
        if let Some(mut stderr) = stderr {
            if let Err(e) = stderr.read_to_end(&mut bytes).await {
                debug!(error = %e, "stderr read ended early");
            }
        }
        String::from_utf8_lossy(&bytes).into_owned()
    });

    let mut stdout_text = String::new();
    let mut decoder = Utf8ChunkDecoder::default();

    let drive = async {
        if let Some(mut stdout) = stdout {
            let mut buf = vec![0u8; READ_CHUNK_SIZE];
            loop {
                let n = stdout.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                let text = decoder.push(&buf[..n]);
                if !text.is_empty() {
                    on_stdout(&text);
                    stdout_text.push_str(&text);
                }
            }
        }
        child.wait().await
    };

    let waited: Result<std::io::Result<std::process::ExitStatus>, _> =
        tokio::time::timeout(cmd.timeout, drive).await;

    let tail = decoder.finish();
    if !tail.is_empty() {
        on_stdout(&tail);
        stdout_text.push_str(&tail);
    }

    let (exit_code, outcome, note) = match waited {
        Ok(Ok(status)) => {
            // Killed by a signal: no code, count it as a failure.
            let code = status.code().unwrap_or(1);
            info!(exit_code = code, "runner exited");
            (code, ProcessOutcome::Exited, None)
        }
        Ok(Err(e)) => {
            warn!(error = %e, "lost contact with runner, terminating");
            terminate(&mut child).await;
            (1, ProcessOutcome::Exited, Some(format!("runner I/O error: {}", e)))
        }
        Err(_) => {
            warn!(timeout_sec = cmd.timeout.as_secs(), "runner timed out, terminating");
            terminate(&mut child).await;
            (
                1,
                ProcessOutcome::TimedOut,
                Some(format!(
                    "runner timed out after {} seconds",
                    cmd.timeout.as_secs()
                )),
            )
        }
    };

    let stderr_text = match tokio::time::timeout(STDERR_GRACE, &mut stderr_task).await {
        Ok(Ok(text)) => text,
        Ok(Err(e)) => {
            debug!(error = %e, "stderr reader task failed");
            String::new()
        }
        Err(_) => {
            debug!("stderr still open after runner exit, abandoning");
            stderr_task.abort();
            String::new()
        }
    };

    let mut combined_output = stdout_text;
    for extra in [Some(stderr_text), note].into_iter().flatten() {
        if extra.is_empty() {
            continue;
        }
        if !combined_output.is_empty() && !combined_output.ends_with('\n') {
            combined_output.push('\n');
        }
        combined_output.push_str(&extra);
    }

    ProcessOutput {
        combined_output,
        exit_code,
        outcome,
    }
}

async fn terminate(child: &mut tokio::process::Child) {
    if let Err(e) = child.kill().await {
        warn!(error = %e, "failed to kill runner");
    }
}

// ---------------------------------------------------------------------------
// UTF-8 chunk decoding
// ---------------------------------------------------------------------------

/// Decodes a byte stream chunk by chunk, holding back a trailing incomplete
/// multi-byte sequence until the next chunk completes it.
#[derive(Debug, Default)]
struct Utf8ChunkDecoder {
    pending: Vec<u8>,
}

impl Utf8ChunkDecoder {
    fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        None => {
                            self.pending.drain(..valid);
                            break;
                        }
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + bad);
                        }
                    }
                }
            }
        }

        out
    }

    fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
