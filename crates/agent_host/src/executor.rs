//! Non-interactive command execution with safety checks.
//!
//! Used for one-shot commands where nobody can answer a prompt: stdin is
//! closed right away, output is collected up to a byte cap, and the same
//! timeout as interactive runs applies.

use crate::runner;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use shared::events::ProcessEvent;
use shared::script::{RunFailure, EXIT_FAILURE, EXIT_TIMEOUT};
use shared::settings::ExecutorSettings;
use std::time::Instant;
use tracing::{debug, warn};

/// Danger level for commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DangerLevel {
    /// Read-only commands (ls, cat, df, ...)
    Safe,
    /// Anything not known to be safe
    NeedsConfirmation,
    /// Removes files, changes permissions or kills processes
    Dangerous,
    /// Runs through sudo
    NeedsSudo,
    /// Never run
    Blocked,
}

/// Why a script was refused before running.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScriptRejection {
    #[error("script is empty")]
    Empty,

    #[error("dangerous command detected: {pattern}")]
    Destructive { pattern: String },
}

/// Result of command execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// stdout followed by stderr
    pub output: String,
    pub duration_ms: u64,
    pub success: bool,
    #[serde(skip)]
    pub failure: Option<RunFailure>,
    /// The error output suggests missing privileges
    pub needed_sudo: bool,
}

impl CommandResult {
    fn failed(command: &str, exit_code: i32, failure: RunFailure, duration_ms: u64) -> Self {
        let message = failure.to_string();
        Self {
            command: command.to_string(),
            exit_code,
            stdout: String::new(),
            stderr: message.clone(),
            output: message,
            duration_ms,
            success: false,
            failure: Some(failure),
            needed_sudo: false,
        }
    }
}

const SAFE_COMMANDS: &[&str] = &[
    "ls", "cat", "head", "tail", "wc", "du", "df", "pwd", "file", "stat", "which", "grep",
    "sort", "uniq", "cut", "uname", "hostname", "uptime", "free", "ps", "lscpu", "lsblk",
    "lsusb", "lspci", "id", "whoami", "date", "ip", "ping", "echo", "printf", "journalctl",
    "systemctl status",
];

const DANGEROUS_COMMANDS: &[&str] = &[
    "rm", "rmdir", "shred", "chmod", "chown", "chgrp", "kill", "killall", "pkill", "truncate",
];

/// Substrings that are refused anywhere in a script.
const BLOCKED_PATTERNS: &[&str] = &[
    "rm -rf /",
    ":(){ :|:& };:",
    "mkfs",
    "dd if=",
    "> /dev/sda",
    ">/dev/sda",
    "format c:",
];

fn classify_line(line: &str) -> DangerLevel {
    if BLOCKED_PATTERNS.iter().any(|p| line.contains(p)) {
        return DangerLevel::Blocked;
    }
    if line.starts_with("sudo ") || line.contains(" sudo ") {
        return DangerLevel::NeedsSudo;
    }
    let starts_with_word = |word: &str| {
        line == word
            || line
                .strip_prefix(word)
                .is_some_and(|rest| rest.starts_with(' '))
    };
    if DANGEROUS_COMMANDS.iter().any(|c| starts_with_word(c)) {
        return DangerLevel::Dangerous;
    }
    if SAFE_COMMANDS.iter().any(|c| starts_with_word(c)) {
        return DangerLevel::Safe;
    }
    DangerLevel::NeedsConfirmation
}

/// Classify a command or multi-line script by its most dangerous line.
/// Blank lines and comments are ignored.
pub fn classify_command(cmd: &str) -> DangerLevel {
    cmd.to_lowercase()
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(classify_line)
        .max()
        .unwrap_or(DangerLevel::Safe)
}

/// Refuse empty scripts and known destructive commands.
pub fn validate_script(content: &str) -> Result<(), ScriptRejection> {
    if content.trim().is_empty() {
        return Err(ScriptRejection::Empty);
    }
    let lower = content.to_lowercase();
    match BLOCKED_PATTERNS.iter().find(|p| lower.contains(*p)) {
        Some(pattern) => Err(ScriptRejection::Destructive {
            pattern: pattern.to_string(),
        }),
        None => Ok(()),
    }
}

/// Execute a command and return structured result.
///
/// Blocked commands are refused with an error. Every other outcome, including
/// spawn failures, timeouts and oversized output, is a `CommandResult`.
pub async fn execute_command(cmd: &str, settings: &ExecutorSettings) -> Result<CommandResult> {
    validate_script(cmd)?;

    let start = Instant::now();
    let mut process = match runner::spawn(cmd, &settings.shell) {
        Ok(process) => process,
        Err(e) => {
            warn!("{}", e);
            let failure = RunFailure::SpawnFailure {
                reason: e.to_string(),
            };
            return Ok(CommandResult::failed(cmd, EXIT_FAILURE, failure, 0));
        }
    };
    // nobody can answer a prompt here
    drop(process.take_stdin());

    let limit = settings.output_limit_bytes;
    let deadline = tokio::time::sleep(settings.timeout());
    tokio::pin!(deadline);

    let mut stdout = String::new();
    let mut stderr = String::new();
    let outcome = loop {
        tokio::select! {
            event = process.next_event() => match event {
                Some(ProcessEvent::Stdout(text)) => stdout.push_str(&text),
                Some(ProcessEvent::Stderr(text)) => stderr.push_str(&text),
                Some(ProcessEvent::Exited(code)) => break Ok(code.unwrap_or(EXIT_FAILURE)),
                Some(ProcessEvent::Failed(reason)) => {
                    break Err((EXIT_FAILURE, RunFailure::RuntimeError { reason }))
                }
                None => {
                    break Err((EXIT_FAILURE, RunFailure::RuntimeError {
                        reason: "process event stream closed".into(),
                    }))
                }
            },
            _ = &mut deadline => {
                break Err((EXIT_TIMEOUT, RunFailure::Timeout { secs: settings.timeout_secs }));
            }
        }
        if stdout.len() + stderr.len() > limit {
            break Err((EXIT_FAILURE, RunFailure::OutputLimitExceeded { limit }));
        }
    };
    let duration_ms = start.elapsed().as_millis() as u64;

    let exit_code = match outcome {
        Ok(code) => code,
        Err((code, failure)) => {
            process.kill();
            warn!(command = %cmd, "{}", failure);
            return Ok(CommandResult::failed(cmd, code, failure, duration_ms));
        }
    };
    debug!(command = %cmd, exit_code, duration_ms, "command finished");

    let mut output = stdout.clone();
    if !stderr.is_empty() {
        if !output.is_empty() && !output.ends_with('\n') {
            output.push('\n');
        }
        output.push_str(&stderr);
    }
    let needed_sudo = stderr_needs_elevation(&stderr);

    Ok(CommandResult {
        command: cmd.to_string(),
        exit_code,
        stdout,
        stderr,
        output,
        duration_ms,
        success: exit_code == 0,
        failure: None,
        needed_sudo,
    })
}

fn stderr_needs_elevation(stderr: &str) -> bool {
    ["Permission denied", "Operation not permitted", "must be root", "requires root"]
        .iter()
        .any(|s| stderr.contains(s))
}

/// Whether a failed command should be retried through sudo.
pub fn needs_elevation(result: &CommandResult) -> bool {
    !result.success && (result.needed_sudo || stderr_needs_elevation(&result.stderr))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_safe() {
        assert_eq!(classify_command("ls -la"), DangerLevel::Safe);
        assert_eq!(classify_command("df -h\n# disk usage\nfree -m"), DangerLevel::Safe);
    }

    #[test]
    fn test_classify_dangerous() {
        assert_eq!(classify_command("rm file.txt"), DangerLevel::Dangerous);
        assert_eq!(classify_command("chmod 777 file"), DangerLevel::Dangerous);
        // prefix of another word is not a match
        assert_eq!(classify_command("rmate notes"), DangerLevel::NeedsConfirmation);
    }

    #[test]
    fn test_classify_blocked_and_sudo() {
        assert_eq!(classify_command("rm -rf /"), DangerLevel::Blocked);
        assert_eq!(classify_command("sudo apt update"), DangerLevel::NeedsSudo);
        assert_eq!(
            classify_command("echo start\nsudo systemctl restart nginx"),
            DangerLevel::NeedsSudo
        );
    }

    #[test]
    fn test_validate_script() {
        assert_eq!(validate_script("   \n"), Err(ScriptRejection::Empty));
        assert_eq!(
            validate_script("sudo MKFS.ext4 /dev/sdb1"),
            Err(ScriptRejection::Destructive {
                pattern: "mkfs".into()
            })
        );
        assert!(validate_script("dd if=/dev/zero of=disk.img").is_err());
        assert!(validate_script("df -h").is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_execute_collects_both_streams() {
        let result = execute_command("echo out; echo err >&2; exit 2", &ExecutorSettings::default())
            .await
            .unwrap();
        assert_eq!(result.exit_code, 2);
        assert!(!result.success);
        assert_eq!(result.stdout, "out\n");
        assert_eq!(result.stderr, "err\n");
        assert_eq!(result.output, "out\nerr\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_execute_refuses_blocked() {
        assert!(execute_command("rm -rf /", &ExecutorSettings::default())
            .await
            .is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_output_limit() {
        let settings = ExecutorSettings {
            output_limit_bytes: 1024,
            ..ExecutorSettings::default()
        };
        let result = execute_command("yes", &settings).await.unwrap();
        assert_eq!(result.exit_code, EXIT_FAILURE);
        assert_eq!(
            result.failure,
            Some(RunFailure::OutputLimitExceeded { limit: 1024 })
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout() {
        let settings = ExecutorSettings {
            timeout_secs: 1,
            ..ExecutorSettings::default()
        };
        let result = execute_command("sleep 30", &settings).await.unwrap();
        assert_eq!(result.exit_code, EXIT_TIMEOUT);
        assert_eq!(result.failure, Some(RunFailure::Timeout { secs: 1 }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stdin_is_closed() {
        let result = execute_command("cat; echo done", &ExecutorSettings::default())
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.stdout, "done\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_needs_elevation() {
        let result = execute_command(
            "echo 'cat: /root/x: Permission denied' >&2; exit 1",
            &ExecutorSettings::default(),
        )
        .await
        .unwrap();
        assert!(result.needed_sudo);
        assert!(needs_elevation(&result));
    }
}
