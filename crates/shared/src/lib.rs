pub mod events;
pub mod host;
pub mod script;

pub mod settings {
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    /// Hard limit on how long a single script run may take.
    pub const DEFAULT_TIMEOUT_SECS: u64 = 300;
    /// Output cap for the non-interactive execution path (10 MB).
    pub const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 10 * 1024 * 1024;

    fn default_timeout_secs() -> u64 {
        DEFAULT_TIMEOUT_SECS
    }

    fn default_output_limit() -> usize {
        DEFAULT_OUTPUT_LIMIT_BYTES
    }

    /// Interpreter used to run a single command string.
    ///
    /// Empty fields fall back to the platform shell: `sh -c` on Unix-like
    /// targets, `cmd /C` on Windows.
    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ShellConfig {
        #[serde(default)]
        pub program: Option<String>,
        #[serde(default)]
        pub flag: Option<String>,
    }

    impl ShellConfig {
        pub fn program(&self) -> &str {
            match self.program.as_deref() {
                Some(p) if !p.is_empty() => p,
                _ if cfg!(windows) => "cmd",
                _ => "sh",
            }
        }

        pub fn flag(&self) -> &str {
            match self.flag.as_deref() {
                Some(f) if !f.is_empty() => f,
                _ if cfg!(windows) => "/C",
                _ => "-c",
            }
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ExecutorSettings {
        #[serde(default = "default_timeout_secs")]
        pub timeout_secs: u64,
        #[serde(default = "default_output_limit")]
        pub output_limit_bytes: usize,
        #[serde(default)]
        pub shell: ShellConfig,
    }

    impl ExecutorSettings {
        pub fn timeout(&self) -> Duration {
            Duration::from_secs(self.timeout_secs)
        }
    }

    impl Default for ExecutorSettings {
        fn default() -> Self {
            Self {
                timeout_secs: DEFAULT_TIMEOUT_SECS,
                output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
                shell: ShellConfig::default(),
            }
        }
    }

    /// Local model served by Ollama.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ModelSettings {
        pub base_url: String, // OLLAMA_BASE_URL wins when set
        pub model: String,
        #[serde(default)]
        pub temperature: f32,
    }

    impl Default for ModelSettings {
        fn default() -> Self {
            Self {
                base_url: "http://127.0.0.1:11434".into(),
                model: "gpt-oss:20b".into(),
                temperature: 0.0,
            }
        }
    }

    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum ThemePreference {
        #[default]
        Light,
        Dark,
    }

    impl std::str::FromStr for ThemePreference {
        type Err = String;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            match s.trim().to_lowercase().as_str() {
                "light" => Ok(ThemePreference::Light),
                "dark" => Ok(ThemePreference::Dark),
                other => Err(format!("unknown theme '{}'", other)),
            }
        }
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    pub struct AppSettings {
        #[serde(default)]
        pub executor: ExecutorSettings,
        #[serde(default)]
        pub model: ModelSettings,
    }
}

pub mod agent_api {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ChatMessage {
        pub role: String, // "system" | "user" | "assistant"
        pub content: String,
    }

    impl ChatMessage {
        pub fn user(content: impl Into<String>) -> Self {
            Self {
                role: "user".into(),
                content: content.into(),
            }
        }

        pub fn assistant(content: impl Into<String>) -> Self {
            Self {
                role: "assistant".into(),
                content: content.into(),
            }
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum Sender {
        User,
        Agent,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum MessageKind {
        Text,
        Script,
        Action,
    }

    /// Structured reply the agent is instructed to produce.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct AgentMessage {
        #[serde(default)]
        pub id: String,
        pub text: String,
        pub sender: Sender,
        #[serde(default)]
        pub timestamp: String,
        #[serde(rename = "type")]
        pub kind: MessageKind,
    }

    /// Script embedded as a JSON string in the `text` of a script message.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ScriptPayload {
        pub title: String,
        #[serde(default)]
        pub description: String,
        #[serde(alias = "code")]
        pub content: String,
        #[serde(rename = "responseMessage", default)]
        pub response_message: String,
    }

    impl AgentMessage {
        /// Decode the script carried by this message, if it is a script message.
        pub fn script_payload(&self) -> Option<ScriptPayload> {
            if self.kind != MessageKind::Script {
                return None;
            }
            serde_json::from_str::<ScriptPayload>(&self.text)
                .ok()
                .filter(|p| !p.title.is_empty() && !p.content.is_empty())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_script_payload_decodes_nested_json() {
            let raw = r#"{
                "id": "m1",
                "text": "{\"title\":\"Disk\",\"description\":\"Check disk\",\"content\":\"df -h\",\"responseMessage\":\"Done\"}",
                "sender": "agent",
                "timestamp": "2024-01-01T00:00:00Z",
                "type": "script"
            }"#;
            let msg: AgentMessage = serde_json::from_str(raw).unwrap();
            let payload = msg.script_payload().unwrap();
            assert_eq!(payload.title, "Disk");
            assert_eq!(payload.content, "df -h");
            assert_eq!(payload.response_message, "Done");
        }

        #[test]
        fn test_text_message_has_no_payload() {
            let msg = AgentMessage {
                id: "m2".into(),
                text: "hello".into(),
                sender: Sender::Agent,
                timestamp: String::new(),
                kind: MessageKind::Text,
            };
            assert!(msg.script_payload().is_none());
        }
    }
}
