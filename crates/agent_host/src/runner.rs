//! Command runner: spawns a shell for a command string and streams its output.
//!
//! Output arrives on a single merged channel of [`ProcessEvent`]s, one per
//! chunk read from the pipe. Nothing is buffered to completion, so a prompt
//! printed without a trailing newline still reaches the caller immediately.

use shared::events::ProcessEvent;
use shared::settings::ShellConfig;
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

const READ_CHUNK: usize = 8 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Live subprocess started by [`spawn`].
pub struct ProcessHandle {
    stdin: Option<ChildStdin>,
    events: mpsc::UnboundedReceiver<ProcessEvent>,
    kill: Option<oneshot::Sender<()>>,
}

impl ProcessHandle {
    /// Take the input channel. The runner never closes it on its own.
    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.stdin.take()
    }

    /// Next event, or `None` once `Exited`/`Failed` has been delivered.
    pub async fn next_event(&mut self) -> Option<ProcessEvent> {
        self.events.recv().await
    }

    /// Ask the process to die. Safe to call more than once.
    /// Dropping the handle has the same effect.
    pub fn kill(&mut self) {
        if let Some(tx) = self.kill.take() {
            let _ = tx.send(());
        }
    }
}

/// Spawn `command_line` under the configured shell with all three pipes.
pub fn spawn(command_line: &str, shell: &ShellConfig) -> Result<ProcessHandle, RunnerError> {
    let program = shell.program().to_string();
    let mut child = Command::new(&program)
        .arg(shell.flag())
        .arg(command_line)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| RunnerError::Spawn {
            program: program.clone(),
            source,
        })?;

    debug!(pid = ?child.id(), program = %program, "spawned process");

    let (tx, rx) = mpsc::unbounded_channel();
    let (kill_tx, kill_rx) = oneshot::channel();

    let stdin = child.stdin.take();
    let stdout = child
        .stdout
        .take()
        .map(|s| tokio::spawn(pump(s, tx.clone(), ProcessEvent::Stdout)));
    let stderr = child
        .stderr
        .take()
        .map(|s| tokio::spawn(pump(s, tx.clone(), ProcessEvent::Stderr)));

    tokio::spawn(supervise(child, stdout, stderr, tx, kill_rx));

    Ok(ProcessHandle {
        stdin,
        events: rx,
        kill: Some(kill_tx),
    })
}

/// Wait for exit (or a kill request), then drain both pipes before
/// reporting, so `Exited` is never followed by output.
async fn supervise(
    mut child: Child,
    stdout: Option<tokio::task::JoinHandle<()>>,
    stderr: Option<tokio::task::JoinHandle<()>>,
    tx: mpsc::UnboundedSender<ProcessEvent>,
    mut kill_rx: oneshot::Receiver<()>,
) {
    let (status, killed) = tokio::select! {
        status = child.wait() => (status, false),
        _ = &mut kill_rx => {
            let _ = child.start_kill();
            (child.wait().await, true)
        }
    };

    match status {
        Ok(status) => {
            let pumps: Vec<_> = [stdout, stderr].into_iter().flatten().collect();
            let aborts: Vec<_> = pumps.iter().map(|t| t.abort_handle()).collect();
            // children of the shell may hold the pipes open after it exits
            if killed {
                aborts.iter().for_each(|a| a.abort());
            } else {
                let drain = async {
                    for task in pumps {
                        let _ = task.await;
                    }
                };
                tokio::select! {
                    _ = drain => {}
                    _ = &mut kill_rx => {
                        debug!("kill requested while draining output");
                        aborts.iter().for_each(|a| a.abort());
                    }
                }
            }
            let _ = tx.send(ProcessEvent::Exited(exit_code(status)));
        }
        Err(e) => {
            let _ = tx.send(ProcessEvent::Failed(e.to_string()));
        }
    }
}

async fn pump<R>(
    mut reader: R,
    tx: mpsc::UnboundedSender<ProcessEvent>,
    wrap: fn(String) -> ProcessEvent,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK];
    let mut carry = Vec::new();
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let text = decode_chunk(&mut carry, &buf[..n]);
                if !text.is_empty() && tx.send(wrap(text)).is_err() {
                    return;
                }
            }
            Err(e) => {
                let _ = tx.send(ProcessEvent::Failed(format!("read error: {}", e)));
                return;
            }
        }
    }
    if !carry.is_empty() {
        let _ = tx.send(wrap(String::from_utf8_lossy(&carry).into_owned()));
    }
}

/// Decode `bytes` as UTF-8, keeping an incomplete trailing sequence in
/// `carry` for the next read. Invalid bytes are replaced.
pub(crate) fn decode_chunk(carry: &mut Vec<u8>, bytes: &[u8]) -> String {
    carry.extend_from_slice(bytes);
    match std::str::from_utf8(carry) {
        Ok(s) => {
            let out = s.to_string();
            carry.clear();
            out
        }
        Err(e) if e.error_len().is_none() => {
            let valid = e.valid_up_to();
            let out = String::from_utf8_lossy(&carry[..valid]).into_owned();
            carry.drain(..valid);
            out
        }
        Err(_) => {
            let out = String::from_utf8_lossy(carry).into_owned();
            carry.clear();
            out
        }
    }
}

/// Exit code, with signal deaths reported as 128 + signal on Unix.
fn exit_code(status: ExitStatus) -> Option<i32> {
    if let Some(code) = status.code() {
        return Some(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(sig) = status.signal() {
            return Some(128 + sig);
        }
    }
    None
}
