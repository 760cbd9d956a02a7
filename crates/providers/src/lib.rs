//! Model access for the helper: the Ollama chat client and the agent session
//! built on top of it.

pub mod agent;
pub mod ollama;

pub use agent::{AgentError, AgentSession, ChatBackend};
pub use ollama::OllamaClient;
