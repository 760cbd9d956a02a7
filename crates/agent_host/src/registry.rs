//! Session registry: live runs keyed by their caller-chosen id.
//!
//! The registry is owned by an [`Orchestrator`](crate::orchestrator::Orchestrator)
//! and shared with anything that needs to reach a running script (the
//! credential relay, cancellation). Operations on one run never touch another
//! run's entry.

use parking_lot::{Mutex, RwLock};
use shared::script::LogEntry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::ChildStdin;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use zeroize::Zeroizing;

/// Messages from outside the run loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunControl {
    /// The relay was invoked, whether or not the write went through.
    CredentialSupplied,
    Cancel,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("a run with id '{0}' is already active")]
    Duplicate(String),
}

/// Everything the rest of the process may need about a live run.
pub struct RunEntry {
    run_id: String,
    rewritten_for_stdin_credential: bool,
    credential_supplied: AtomicBool,
    input: mpsc::UnboundedSender<Zeroizing<String>>,
    control: mpsc::UnboundedSender<RunControl>,
    logs: Mutex<Vec<LogEntry>>,
}

impl RunEntry {
    pub(crate) fn new(
        run_id: impl Into<String>,
        rewritten_for_stdin_credential: bool,
        input: mpsc::UnboundedSender<Zeroizing<String>>,
        control: mpsc::UnboundedSender<RunControl>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            rewritten_for_stdin_credential,
            credential_supplied: AtomicBool::new(false),
            input,
            control,
            logs: Mutex::new(Vec::new()),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// True when `sudo` was rewritten to `sudo -S` before spawning.
    pub fn rewritten_for_stdin_credential(&self) -> bool {
        self.rewritten_for_stdin_credential
    }

    pub fn credential_supplied(&self) -> bool {
        self.credential_supplied.load(Ordering::SeqCst)
    }

    /// Flip the supplied flag. Returns false if it was already set.
    pub(crate) fn mark_credential_supplied(&self) -> bool {
        self.credential_supplied
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Queue a line for the process's stdin. Does not wait for the write.
    pub(crate) fn send_input(&self, line: Zeroizing<String>) -> bool {
        self.input.send(line).is_ok()
    }

    pub(crate) fn send_control(&self, control: RunControl) -> bool {
        self.control.send(control).is_ok()
    }

    pub(crate) fn push_log(&self, entry: LogEntry) {
        self.logs.lock().push(entry);
    }

    pub(crate) fn take_logs(&self) -> Vec<LogEntry> {
        std::mem::take(&mut *self.logs.lock())
    }
}

/// Start the task that owns a process's stdin.
///
/// Lines are written in order. After the first failed write (or when there is
/// no stdin at all) the receiver is gone and further sends fail, which the
/// relay reports as a closed input channel.
pub(crate) fn spawn_input_writer(
    run_id: &str,
    stdin: Option<ChildStdin>,
    mut rx: mpsc::UnboundedReceiver<Zeroizing<String>>,
) {
    let Some(mut stdin) = stdin else {
        return;
    };
    let run_id = run_id.to_string();
    tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            let result = async {
                stdin.write_all(line.as_bytes()).await?;
                stdin.flush().await
            }
            .await;
            if let Err(e) = result {
                warn!(run_id = %run_id, "stdin write failed: {}", e);
                break;
            }
            debug!(run_id = %run_id, bytes = line.len(), "stdin write complete");
        }
    });
}

/// In-memory table of live runs.
#[derive(Default)]
pub struct SessionRegistry {
    runs: RwLock<HashMap<String, Arc<RunEntry>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a run. At most one live entry may exist per id.
    pub fn register(&self, entry: RunEntry) -> Result<Arc<RunEntry>, RegistryError> {
        let mut runs = self.runs.write();
        if runs.contains_key(&entry.run_id) {
            return Err(RegistryError::Duplicate(entry.run_id));
        }
        let entry = Arc::new(entry);
        runs.insert(entry.run_id.clone(), entry.clone());
        Ok(entry)
    }

    pub fn get(&self, run_id: &str) -> Option<Arc<RunEntry>> {
        self.runs.read().get(run_id).cloned()
    }

    pub fn unregister(&self, run_id: &str) -> Option<Arc<RunEntry>> {
        self.runs.write().remove(run_id)
    }

    pub fn len(&self) -> usize {
        self.runs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str) -> (RunEntry, mpsc::UnboundedReceiver<RunControl>) {
        let (input, _) = mpsc::unbounded_channel();
        let (control, control_rx) = mpsc::unbounded_channel();
        (RunEntry::new(id, false, input, control), control_rx)
    }

    #[test]
    fn test_register_get_unregister() {
        let registry = SessionRegistry::new();
        let (e, _rx) = entry("a");
        registry.register(e).unwrap();
        assert_eq!(registry.get("a").unwrap().run_id(), "a");
        assert!(registry.unregister("a").is_some());
        assert!(registry.get("a").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let registry = SessionRegistry::new();
        let (a, _rx1) = entry("same");
        let (b, _rx2) = entry("same");
        registry.register(a).unwrap();
        assert!(matches!(
            registry.register(b),
            Err(RegistryError::Duplicate(id)) if id == "same"
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_runs_are_independent() {
        let registry = SessionRegistry::new();
        let (a, _rx1) = entry("a");
        let (b, _rx2) = entry("b");
        registry.register(a).unwrap();
        registry.register(b).unwrap();
        registry.get("a").unwrap().push_log(LogEntry::stdout("from a"));
        registry.unregister("a");
        let b = registry.get("b").unwrap();
        assert!(b.take_logs().is_empty());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_credential_flag_flips_once() {
        let (e, _rx) = entry("x");
        assert!(!e.credential_supplied());
        assert!(e.mark_credential_supplied());
        assert!(!e.mark_credential_supplied());
        assert!(e.credential_supplied());
    }

    #[tokio::test]
    async fn test_writer_without_stdin_is_closed() {
        let (tx, rx) = mpsc::unbounded_channel();
        spawn_input_writer("x", None, rx);
        assert!(tx.send(Zeroizing::new("secret\n".to_string())).is_err());
    }

    #[test]
    fn test_control_reaches_loop() {
        let (e, mut rx) = entry("x");
        assert!(e.send_control(RunControl::Cancel));
        assert_eq!(rx.try_recv().ok(), Some(RunControl::Cancel));
    }
}
