//! Agent Host - local AI helper with interactive script execution
//!
//! This crate provides:
//! - Streaming execution of agent-written scripts, with sudo password prompts
//!   relayed to the user and answered through stdin
//! - A one-shot executor for commands that need no interaction
//! - The conversation with the local model

pub mod executor;
pub mod guard;
pub mod orchestrator;
pub mod prompt;
pub mod registry;
pub mod runner;

pub use executor::{
    classify_command, execute_command, needs_elevation, validate_script, CommandResult,
    DangerLevel, ScriptRejection,
};
pub use orchestrator::{
    rewrite_for_stdin_credential, Orchestrator, RelayError, RelayOutcome, RunRequest,
};
pub use prompt::is_credential_prompt;
pub use registry::SessionRegistry;

use anyhow::Result;
use providers::{AgentError, AgentSession, OllamaClient};
use shared::agent_api::AgentMessage;
use shared::events::RunEvent;
use shared::host::HostDescription;
use shared::script::RunResult;
use shared::settings::AppSettings;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

/// Agent host ties the model conversation to script execution
pub struct AgentHost {
    settings: AppSettings,
    orchestrator: Orchestrator,
    session: AgentSession<OllamaClient>,
}

impl AgentHost {
    pub fn new(settings: AppSettings) -> Self {
        let orchestrator = Orchestrator::new(settings.executor.clone());
        let session = AgentSession::new(OllamaClient::new(&settings.model));
        Self {
            settings,
            orchestrator,
            session,
        }
    }

    pub fn settings(&self) -> &AppSettings {
        &self.settings
    }

    /// Cloneable handle for relaying credentials from another task.
    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Validate and run a script, streaming events to `events`.
    pub async fn run_script(
        &self,
        request: RunRequest,
        events: UnboundedSender<RunEvent>,
    ) -> Result<RunResult, ScriptRejection> {
        validate_script(&request.script)?;
        Ok(self.orchestrator.start_run(request, events).await)
    }

    /// Validate a script and drive its run on a task of its own, so the
    /// caller stays free to prompt for a password or cancel meanwhile.
    pub fn spawn_run(
        &self,
        request: RunRequest,
        events: UnboundedSender<RunEvent>,
    ) -> Result<JoinHandle<RunResult>, ScriptRejection> {
        validate_script(&request.script)?;
        let orchestrator = self.orchestrator.clone();
        Ok(tokio::spawn(async move {
            orchestrator.start_run(request, events).await
        }))
    }

    pub fn supply_credential(&self, run_id: &str, credential: &str) -> RelayOutcome {
        self.orchestrator
            .supply_credential(run_id, credential)
            .into()
    }

    pub fn cancel_run(&self, run_id: &str) -> RelayOutcome {
        self.orchestrator.cancel_run(run_id).into()
    }

    /// Execute a command without interaction
    pub async fn execute(&self, cmd: &str) -> Result<CommandResult> {
        execute_command(cmd, &self.settings.executor).await
    }

    pub async fn prime(&mut self, host: &HostDescription) -> Result<(), AgentError> {
        self.session.prime(host).await
    }

    pub async fn ask(&mut self, text: &str) -> Result<AgentMessage, AgentError> {
        self.session.ask(text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_run_script_rejects_destructive() {
        let host = AgentHost::new(AppSettings::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let err = host
            .run_script(RunRequest::new("r", "sudo mkfs.ext4 /dev/sdb1"), tx)
            .await
            .unwrap_err();
        assert!(matches!(err, ScriptRejection::Destructive { .. }));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_spawn_run_rejects_before_spawning() {
        let host = AgentHost::new(AppSettings::default());
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = host
            .spawn_run(RunRequest::new("r", "   "), tx)
            .unwrap_err();
        assert!(matches!(err, ScriptRejection::Empty));
        assert!(host.orchestrator().registry().is_empty());
    }

    #[test]
    fn test_relay_outcome_for_unknown_run() {
        let host = AgentHost::new(AppSettings::default());
        let outcome = host.supply_credential("nope", "secret");
        assert!(!outcome.accepted);
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["accepted"], false);
        assert!(!json.to_string().contains("secret"));
        assert!(!host.cancel_run("nope").accepted);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_script_streams() {
        let host = AgentHost::new(AppSettings::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let result = host
            .run_script(RunRequest::new("r", "echo hi"), tx)
            .await
            .unwrap();
        assert!(result.success());
        let mut last = None;
        while let Ok(ev) = rx.try_recv() {
            last = Some(ev);
        }
        assert!(matches!(last, Some(RunEvent::Finished { exit_code: 0, .. })));
    }
}
