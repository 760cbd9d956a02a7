//! Script and run result types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Exit code reported when a run exceeds its time limit.
pub const EXIT_TIMEOUT: i32 = 124;
/// Exit code reported when a run could not start or failed at the OS level.
pub const EXIT_FAILURE: i32 = 1;
/// Exit code reported when the caller cancelled a run.
pub const EXIT_CANCELLED: i32 = 130;

/// A script saved from the conversation or added by hand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Script {
    pub id: String,
    pub title: String,
    pub description: String,
    /// Shell source
    pub content: String,
    pub created_at: DateTime<Utc>,
    /// Message that produced the script ("manual" for hand-written ones)
    pub message_id: String,
}

/// One line of script output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub text: String,
    pub is_error: bool,
}

impl LogEntry {
    pub fn stdout(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
        }
    }

    pub fn stderr(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Success,
    Failed,
}

/// Why a run did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RunFailure {
    #[error("Failed to start: {reason}")]
    SpawnFailure { reason: String },

    #[error("Execution error: {reason}")]
    RuntimeError { reason: String },

    #[error("Timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("Exited with code {code}")]
    NonZeroExit { code: i32 },

    #[error("Cancelled by user")]
    Cancelled,

    #[error("Output exceeded {limit} bytes")]
    OutputLimitExceeded { limit: usize },
}

/// Terminal record of a run. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: String,
    pub exit_code: i32,
    pub logs: Vec<LogEntry>,
    pub duration_ms: u64,
}

impl RunResult {
    pub fn status(&self) -> RunStatus {
        if self.exit_code == 0 {
            RunStatus::Success
        } else {
            RunStatus::Failed
        }
    }

    pub fn success(&self) -> bool {
        self.status() == RunStatus::Success
    }

    /// Why the run failed, read back from its exit code and last error line.
    pub fn failure(&self) -> Option<RunFailure> {
        match self.exit_code {
            0 => None,
            EXIT_TIMEOUT => Some(RunFailure::Timeout {
                secs: self.duration_ms / 1000,
            }),
            EXIT_CANCELLED => Some(RunFailure::Cancelled),
            EXIT_FAILURE => match self
                .error_lines()
                .last()
                .and_then(|l| l.strip_prefix("Execution error: "))
            {
                Some(reason) => Some(RunFailure::RuntimeError {
                    reason: reason.to_string(),
                }),
                None => Some(RunFailure::NonZeroExit { code: EXIT_FAILURE }),
            },
            code => Some(RunFailure::NonZeroExit { code }),
        }
    }

    /// Lines from the error stream, including synthetic failure entries.
    pub fn error_lines(&self) -> impl Iterator<Item = &str> {
        self.logs
            .iter()
            .filter(|l| l.is_error)
            .map(|l| l.text.as_str())
    }

    /// Lines joined the way they would appear in a terminal.
    pub fn output(&self) -> String {
        self.logs
            .iter()
            .map(|l| l.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(exit_code: i32) -> RunResult {
        RunResult {
            run_id: "r".into(),
            exit_code,
            logs: vec![LogEntry::stdout("a"), LogEntry::stderr("b")],
            duration_ms: 5,
        }
    }

    #[test]
    fn test_status_follows_exit_code() {
        assert_eq!(result(0).status(), RunStatus::Success);
        assert_eq!(result(EXIT_TIMEOUT).status(), RunStatus::Failed);
        assert!(!result(2).success());
    }

    #[test]
    fn test_output_and_error_lines() {
        let r = result(0);
        assert_eq!(r.output(), "a\nb");
        assert_eq!(r.error_lines().collect::<Vec<_>>(), vec!["b"]);
    }

    #[test]
    fn test_failure_from_result() {
        assert_eq!(result(0).failure(), None);
        assert_eq!(result(130).failure(), Some(RunFailure::Cancelled));
        assert_eq!(
            result(2).failure(),
            Some(RunFailure::NonZeroExit { code: 2 })
        );
        let mut spawn_failed = result(EXIT_FAILURE);
        spawn_failed
            .logs
            .push(LogEntry::stderr("Execution error: no such shell"));
        assert_eq!(
            spawn_failed.failure(),
            Some(RunFailure::RuntimeError {
                reason: "no such shell".into()
            })
        );
    }

    #[test]
    fn test_failure_messages() {
        assert_eq!(
            RunFailure::Timeout { secs: 300 }.to_string(),
            "Timed out after 300s"
        );
        assert_eq!(
            RunFailure::SpawnFailure {
                reason: "No such file".into()
            }
            .to_string(),
            "Failed to start: No such file"
        );
    }
}
