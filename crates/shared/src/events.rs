//! Event types exchanged between a running script and its caller.

use serde::{Deserialize, Serialize};

/// Raw events produced by a spawned subprocess.
///
/// Output chunks are delivered as they are read, never buffered to
/// completion. `Exited` is always the last event for a process that spawned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    Stdout(String),
    Stderr(String),
    /// Exit code, or `None` when the process was killed by a signal.
    Exited(Option<i32>),
    /// OS-level failure while the process was running.
    Failed(String),
}

/// Events delivered to the caller of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    /// One line of live output
    Log {
        run_id: String,
        line: String,
        is_error: bool,
    },
    /// The script is blocked on a password prompt
    CredentialRequested { run_id: String },
    /// The run reached its terminal state
    Finished { run_id: String, exit_code: i32 },
}

impl RunEvent {
    pub fn run_id(&self) -> &str {
        match self {
            RunEvent::Log { run_id, .. } => run_id,
            RunEvent::CredentialRequested { run_id } => run_id,
            RunEvent::Finished { run_id, .. } => run_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_event_serializes_tagged() {
        let event = RunEvent::Finished {
            run_id: "r1".into(),
            exit_code: 0,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "finished");
        assert_eq!(json["run_id"], "r1");
        assert_eq!(event.run_id(), "r1");
    }
}
