//! Conversation with the local model.
//!
//! The session keeps the whole exchange as history and replays it on every
//! request. Replies are expected to be a single JSON object shaped like
//! [`AgentMessage`].

use crate::ollama::OllamaClient;
use async_trait::async_trait;
use shared::agent_api::{AgentMessage, ChatMessage};
use shared::host::HostDescription;
use tracing::{debug, info, warn};

const RESPONSE_FORMAT: &str = r#"You are an assistant specialised in Linux who helps users with operating system tasks.

RESPONSE RULES:
1. Always return ONLY one valid JSON object. No markdown, no code fences, no text before or after it.
2. The object must follow the Message structure below exactly.

MESSAGE TYPES:
- type "text": normal conversational answers
- type "script": when the user asks for a script to be written or run

FORMAT FOR "text" MESSAGES:
{"id": "string", "text": "your answer as plain text", "sender": "agent", "timestamp": "ISO string", "type": "text"}

FORMAT FOR "script" MESSAGES:
The "text" field holds a stringified JSON object with the script:
{"id": "string", "text": "{\"title\":\"Script title\",\"description\":\"What it does\",\"content\":\"script code\",\"responseMessage\":\"Script created!\"}", "sender": "agent", "timestamp": "ISO string", "type": "script"}

IMPORTANT:
- NEVER wrap the answer in markdown
- ALWAYS return parseable JSON
- Escape nested JSON strings properly
- Use sudo for commands that need root; the user will be asked for the password"#;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("model request failed: {0}")]
    Request(String),

    #[error("model returned an empty reply")]
    EmptyReply,

    #[error("model reply is not a valid message: {source}")]
    Malformed {
        raw: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Anything that can answer a chat transcript.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn chat(&self, messages: Vec<ChatMessage>) -> anyhow::Result<String>;
}

#[async_trait]
impl ChatBackend for OllamaClient {
    async fn chat(&self, messages: Vec<ChatMessage>) -> anyhow::Result<String> {
        self.generate(messages).await
    }
}

pub struct AgentSession<B = OllamaClient> {
    backend: B,
    history: Vec<ChatMessage>,
}

impl<B: ChatBackend> AgentSession<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            history: Vec::new(),
        }
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }

    /// Send the response-format rules, then the host context.
    pub async fn prime(&mut self, host: &HostDescription) -> Result<(), AgentError> {
        self.exchange(RESPONSE_FORMAT.to_string()).await?;
        self.exchange(host.to_context()).await?;
        info!(turns = self.history.len(), "agent session primed");
        Ok(())
    }

    /// Ask a question and decode the structured reply.
    pub async fn ask(&mut self, text: &str) -> Result<AgentMessage, AgentError> {
        let reply = self.exchange(text.to_string()).await?;
        parse_reply(&reply)
    }

    async fn exchange(&mut self, input: String) -> Result<String, AgentError> {
        self.history.push(ChatMessage::user(input));
        let reply = match self.backend.chat(self.history.clone()).await {
            Ok(reply) => reply,
            Err(e) => {
                // keep history consistent with what the model has seen
                self.history.pop();
                return Err(AgentError::Request(e.to_string()));
            }
        };
        debug!(chars = reply.len(), "agent reply");
        self.history.push(ChatMessage::assistant(reply.clone()));
        Ok(reply)
    }
}

/// Decode a model reply into an [`AgentMessage`].
///
/// Tolerates code fences and chatter around the object. Missing ids and
/// timestamps are filled in.
pub fn parse_reply(reply: &str) -> Result<AgentMessage, AgentError> {
    let trimmed = reply.trim();
    if trimmed.is_empty() {
        return Err(AgentError::EmptyReply);
    }
    let candidate = match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    };
    let mut message: AgentMessage =
        serde_json::from_str(candidate).map_err(|source| {
            warn!("undecodable agent reply");
            AgentError::Malformed {
                raw: reply.to_string(),
                source,
            }
        })?;
    if message.id.is_empty() {
        message.id = uuid::Uuid::new_v4().to_string();
    }
    if message.timestamp.is_empty() {
        message.timestamp = chrono::Utc::now().to_rfc3339();
    }
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::agent_api::{MessageKind, Sender};
    use std::sync::Mutex;

    struct Scripted {
        replies: Mutex<Vec<String>>,
        seen: Mutex<Vec<usize>>,
    }

    impl Scripted {
        fn new(replies: &[&str]) -> Self {
            Self {
                replies: Mutex::new(replies.iter().rev().map(|r| r.to_string()).collect()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChatBackend for Scripted {
        async fn chat(&self, messages: Vec<ChatMessage>) -> anyhow::Result<String> {
            self.seen.lock().unwrap().push(messages.len());
            self.replies
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| anyhow::anyhow!("connection refused"))
        }
    }

    const TEXT_REPLY: &str = r#"{"id":"a1","text":"Hello!","sender":"agent","timestamp":"2024-01-01T00:00:00Z","type":"text"}"#;

    #[test]
    fn test_parse_plain_reply() {
        let msg = parse_reply(TEXT_REPLY).unwrap();
        assert_eq!(msg.id, "a1");
        assert_eq!(msg.sender, Sender::Agent);
        assert_eq!(msg.kind, MessageKind::Text);
    }

    #[test]
    fn test_parse_fenced_reply_fills_missing_fields() {
        let raw = "```json\n{\"text\":\"hi\",\"sender\":\"agent\",\"type\":\"text\"}\n```";
        let msg = parse_reply(raw).unwrap();
        assert_eq!(msg.text, "hi");
        assert!(!msg.id.is_empty());
        assert!(!msg.timestamp.is_empty());
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(parse_reply("  "), Err(AgentError::EmptyReply)));
        assert!(matches!(
            parse_reply("I cannot answer that"),
            Err(AgentError::Malformed { .. })
        ));
    }

    #[tokio::test]
    async fn test_session_replays_history() {
        let backend = Scripted::new(&["ok", "ok", TEXT_REPLY]);
        let mut session = AgentSession::new(backend);
        session.prime(&HostDescription::default()).await.unwrap();
        let msg = session.ask("hello").await.unwrap();

        assert_eq!(msg.text, "Hello!");
        assert_eq!(session.history().len(), 6);
        assert_eq!(*session.backend.seen.lock().unwrap(), vec![1, 3, 5]);
    }

    #[tokio::test]
    async fn test_failed_request_leaves_history_intact() {
        let mut session = AgentSession::new(Scripted::new(&[]));
        let err = session.ask("hello").await.unwrap_err();
        assert!(matches!(err, AgentError::Request(_)));
        assert!(session.history().is_empty());
    }
}
