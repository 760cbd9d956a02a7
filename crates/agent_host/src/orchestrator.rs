//! Interactive script execution.
//!
//! A run moves through `Starting → Streaming ⇄ AwaitingCredential →
//! Terminating → Done`. Output is forwarded line by line as it arrives. When
//! a password prompt shows up and the caller asked for password handling, the
//! caller is told a credential is needed and output is held until
//! [`Orchestrator::supply_credential`] is called. Every run ends exactly once:
//! on exit, on a process error, on timeout or on cancellation, whichever
//! happens first.

use crate::guard::TimeoutGuard;
use crate::prompt::{is_credential_prompt, PRIVILEGE_TOOL};
use crate::registry::{spawn_input_writer, RunControl, RunEntry, SessionRegistry};
use crate::runner::{self, ProcessHandle};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use shared::events::{ProcessEvent, RunEvent};
use shared::script::{LogEntry, RunResult, EXIT_CANCELLED, EXIT_FAILURE, EXIT_TIMEOUT};
use shared::settings::ExecutorSettings;
use std::sync::{Arc, LazyLock};
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

static SUDO_INVOCATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bsudo[ \t]+(-S\b)?").expect("valid regex"));

/// Parameters of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub run_id: String,
    pub script: String,
    pub wants_password_handling: bool,
}

impl RunRequest {
    pub fn new(run_id: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            script: script.into(),
            wants_password_handling: true,
        }
    }

    pub fn without_password_handling(mut self) -> Self {
        self.wants_password_handling = false;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Starting,
    Streaming,
    AwaitingCredential,
    Terminating,
    Done,
}

#[derive(Debug)]
enum Termination {
    Exited(i32),
    Failed(String),
    TimedOut(String),
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    #[error("run '{0}' not found or already finished")]
    RunNotFound(String),

    #[error("input channel of run '{0}' is unavailable")]
    InputChannelClosed(String),

    #[error("a credential was already supplied for run '{0}'")]
    AlreadySupplied(String),
}

/// Boundary form of a relay answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayOutcome {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl From<Result<(), RelayError>> for RelayOutcome {
    fn from(result: Result<(), RelayError>) -> Self {
        match result {
            Ok(()) => Self {
                accepted: true,
                reason: None,
            },
            Err(e) => Self {
                accepted: false,
                reason: Some(e.to_string()),
            },
        }
    }
}

/// Rewrite `sudo` invocations so the tool reads its password from stdin.
///
/// Returns `None` when nothing changed. Invocations already carrying `-S`
/// are left alone.
pub fn rewrite_for_stdin_credential(script: &str) -> Option<String> {
    if !script.to_lowercase().contains(PRIVILEGE_TOOL) {
        return None;
    }
    let rewritten = SUDO_INVOCATION.replace_all(script, |caps: &Captures| {
        if caps.get(1).is_some() {
            caps[0].to_string()
        } else {
            format!("{} -S ", PRIVILEGE_TOOL)
        }
    });
    if rewritten == script {
        None
    } else {
        Some(rewritten.into_owned())
    }
}

/// Runs scripts and routes credentials to them.
#[derive(Clone)]
pub struct Orchestrator {
    registry: Arc<SessionRegistry>,
    settings: ExecutorSettings,
}

impl Orchestrator {
    pub fn new(settings: ExecutorSettings) -> Self {
        Self::with_registry(settings, Arc::new(SessionRegistry::new()))
    }

    pub fn with_registry(settings: ExecutorSettings, registry: Arc<SessionRegistry>) -> Self {
        Self { registry, settings }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    /// Run a script to completion.
    ///
    /// Live events go to `events`: zero or more `Log`, at most one
    /// `CredentialRequested`, then exactly one `Finished`. Resolves when the
    /// run is done.
    pub async fn start_run(
        &self,
        request: RunRequest,
        events: mpsc::UnboundedSender<RunEvent>,
    ) -> RunResult {
        let started = Instant::now();
        let RunRequest {
            run_id,
            script,
            wants_password_handling,
        } = request;

        let guard = TimeoutGuard::arm(self.settings.timeout());

        let rewritten = if wants_password_handling {
            rewrite_for_stdin_credential(&script)
        } else {
            None
        };
        if rewritten.is_some() {
            debug!(run_id = %run_id, "rewrote sudo to read the password from stdin");
        }

        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let entry = RunEntry::new(&run_id, rewritten.is_some(), input_tx, control_tx);
        let entry = match self.registry.register(entry) {
            Ok(entry) => entry,
            Err(e) => {
                // the live run with this id is left untouched; only this
                // request's own channel hears about the rejection
                warn!(run_id = %run_id, "{}", e);
                let line = format!("Execution error: {}", e);
                let _ = events.send(RunEvent::Log {
                    run_id: run_id.clone(),
                    line: line.clone(),
                    is_error: true,
                });
                let _ = events.send(RunEvent::Finished {
                    run_id: run_id.clone(),
                    exit_code: EXIT_FAILURE,
                });
                return RunResult {
                    run_id,
                    exit_code: EXIT_FAILURE,
                    logs: vec![LogEntry::stderr(line)],
                    duration_ms: started.elapsed().as_millis() as u64,
                };
            }
        };

        info!(run_id = %run_id, "starting run");
        let mut run = RunLoop {
            entry,
            events,
            wants_password_handling,
            state: RunState::Starting,
            held: Vec::new(),
            stdout_partial: String::new(),
            stderr_partial: String::new(),
        };

        let command = rewritten.as_deref().unwrap_or(&script);
        let termination = match runner::spawn(command, &self.settings.shell) {
            Ok(mut process) => {
                spawn_input_writer(&run_id, process.take_stdin(), input_rx);
                run.state = RunState::Streaming;
                let termination = run.drive(&mut process, control_rx, guard).await;
                if matches!(termination, Termination::TimedOut(_) | Termination::Cancelled) {
                    process.kill();
                }
                termination
            }
            Err(e) => {
                warn!(run_id = %run_id, "{}", e);
                Termination::Failed(e.to_string())
            }
        };

        run.finish(termination, &self.registry, started)
    }

    /// Credential relay: write `credential` followed by a newline to the
    /// run's stdin.
    ///
    /// The write is queued, not awaited. The run leaves the awaiting state
    /// even when the write cannot be queued.
    pub fn supply_credential(&self, run_id: &str, credential: &str) -> Result<(), RelayError> {
        let entry = self
            .registry
            .get(run_id)
            .ok_or_else(|| RelayError::RunNotFound(run_id.to_string()))?;

        if !entry.mark_credential_supplied() {
            return Err(RelayError::AlreadySupplied(run_id.to_string()));
        }

        let line = Zeroizing::new(format!("{}\n", credential));
        let queued = entry.send_input(line);
        entry.send_control(RunControl::CredentialSupplied);

        if !queued {
            warn!(run_id = %run_id, "stdin unavailable, credential not delivered");
            return Err(RelayError::InputChannelClosed(run_id.to_string()));
        }

        info!(
            run_id = %run_id,
            chars = credential.chars().count(),
            stdin_mode = entry.rewritten_for_stdin_credential(),
            "credential relayed"
        );
        Ok(())
    }

    /// Kill a live run. It finishes with exit code 130.
    pub fn cancel_run(&self, run_id: &str) -> Result<(), RelayError> {
        let entry = self
            .registry
            .get(run_id)
            .ok_or_else(|| RelayError::RunNotFound(run_id.to_string()))?;
        if entry.send_control(RunControl::Cancel) {
            info!(run_id = %run_id, "cancellation requested");
            Ok(())
        } else {
            Err(RelayError::RunNotFound(run_id.to_string()))
        }
    }
}

struct RunLoop {
    entry: Arc<RunEntry>,
    events: mpsc::UnboundedSender<RunEvent>,
    wants_password_handling: bool,
    state: RunState,
    /// Lines produced while waiting for a credential
    held: Vec<LogEntry>,
    stdout_partial: String,
    stderr_partial: String,
}

impl RunLoop {
    fn run_id(&self) -> &str {
        self.entry.run_id()
    }

    async fn drive(
        &mut self,
        process: &mut ProcessHandle,
        mut control: mpsc::UnboundedReceiver<RunControl>,
        mut guard: TimeoutGuard,
    ) -> Termination {
        let timeout_message = guard.message();
        loop {
            tokio::select! {
                event = process.next_event() => match event {
                    Some(ProcessEvent::Stdout(text)) => self.on_output(text, false),
                    Some(ProcessEvent::Stderr(text)) => self.on_output(text, true),
                    Some(ProcessEvent::Exited(code)) => {
                        return Termination::Exited(code.unwrap_or(EXIT_FAILURE));
                    }
                    Some(ProcessEvent::Failed(reason)) => return Termination::Failed(reason),
                    None => return Termination::Failed("process event stream closed".into()),
                },
                Some(msg) = control.recv() => match msg {
                    RunControl::CredentialSupplied => self.resume(),
                    RunControl::Cancel => return Termination::Cancelled,
                },
                _ = &mut guard => {
                    warn!(run_id = %self.run_id(), "run timed out");
                    return Termination::TimedOut(timeout_message);
                }
            }
        }
    }

    fn on_output(&mut self, text: String, is_error: bool) {
        let partial = if is_error {
            &mut self.stderr_partial
        } else {
            &mut self.stdout_partial
        };
        partial.push_str(&text);

        let mut lines = Vec::new();
        while let Some(pos) = partial.find('\n') {
            lines.push(partial.drain(..=pos).collect::<String>());
        }
        // prompts rarely end in a newline and may arrive split across reads
        let partial_prompt = !partial.is_empty() && is_credential_prompt(partial);
        if partial_prompt {
            partial.clear();
        }

        // lines printed before the prompt are not held
        for line in lines {
            self.emit_line(&line, is_error);
        }

        if (partial_prompt || is_credential_prompt(&text))
            && self.wants_password_handling
            && self.state == RunState::Streaming
            && !self.entry.credential_supplied()
        {
            info!(run_id = %self.run_id(), "password prompt detected");
            self.state = RunState::AwaitingCredential;
            let _ = self.events.send(RunEvent::CredentialRequested {
                run_id: self.run_id().to_string(),
            });
        }
    }

    fn emit_line(&mut self, raw: &str, is_error: bool) {
        let line = raw.trim_end_matches(['\n', '\r']);
        if line.trim().is_empty() || is_credential_prompt(line) {
            return;
        }
        let entry = LogEntry {
            text: line.to_string(),
            is_error,
        };
        if self.state == RunState::AwaitingCredential {
            self.held.push(entry);
        } else {
            self.forward(entry);
        }
    }

    fn forward(&self, entry: LogEntry) {
        let _ = self.events.send(RunEvent::Log {
            run_id: self.run_id().to_string(),
            line: entry.text.clone(),
            is_error: entry.is_error,
        });
        self.entry.push_log(entry);
    }

    fn resume(&mut self) {
        if self.state != RunState::AwaitingCredential {
            return;
        }
        debug!(run_id = %self.run_id(), held = self.held.len(), "resuming output");
        self.state = RunState::Streaming;
        for entry in std::mem::take(&mut self.held) {
            self.forward(entry);
        }
    }

    fn finish(
        mut self,
        termination: Termination,
        registry: &SessionRegistry,
        started: Instant,
    ) -> RunResult {
        self.state = RunState::Terminating;
        for entry in std::mem::take(&mut self.held) {
            self.forward(entry);
        }
        let stdout_rest = std::mem::take(&mut self.stdout_partial);
        let stderr_rest = std::mem::take(&mut self.stderr_partial);
        self.emit_line(&stdout_rest, false);
        self.emit_line(&stderr_rest, true);

        let exit_code = match termination {
            Termination::Exited(code) => code,
            Termination::Failed(reason) => {
                self.forward(LogEntry::stderr(format!("Execution error: {}", reason)));
                EXIT_FAILURE
            }
            Termination::TimedOut(message) => {
                self.forward(LogEntry::stderr(message));
                EXIT_TIMEOUT
            }
            Termination::Cancelled => {
                self.forward(LogEntry::stderr("Cancelled: run stopped by user"));
                EXIT_CANCELLED
            }
        };

        let run_id = self.run_id().to_string();
        registry.unregister(&run_id);
        let logs = self.entry.take_logs();
        let _ = self.events.send(RunEvent::Finished {
            run_id: run_id.clone(),
            exit_code,
        });
        self.state = RunState::Done;

        let duration_ms = started.elapsed().as_millis() as u64;
        info!(run_id = %run_id, exit_code, duration_ms, "run finished");
        RunResult {
            run_id,
            exit_code,
            logs,
            duration_ms,
        }
    }
}
