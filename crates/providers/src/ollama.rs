use anyhow::{anyhow, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use shared::agent_api::ChatMessage;
use shared::settings::ModelSettings;
use std::env;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::debug;

static SHARED_HTTP: LazyLock<Client> = LazyLock::new(|| {
    Client::builder()
        .timeout(Duration::from_secs(300))
        .pool_max_idle_per_host(2)
        .build()
        .expect("failed to build HTTP client")
});

#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<OllamaMessage>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: OllamaMessage,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

pub struct OllamaClient {
    http: Client,
    base: String,
    model: String,
    temperature: f32,
}

impl OllamaClient {
    /// `OLLAMA_BASE_URL` overrides the configured base URL.
    pub fn new(settings: &ModelSettings) -> Self {
        let base = env::var("OLLAMA_BASE_URL").unwrap_or_else(|_| settings.base_url.clone());
        Self {
            http: SHARED_HTTP.clone(),
            base: base.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            temperature: settings.temperature,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn generate(&self, messages: Vec<ChatMessage>) -> Result<String> {
        let req = OllamaChatRequest {
            model: &self.model,
            messages: messages
                .into_iter()
                .map(|m| OllamaMessage {
                    role: m.role,
                    content: m.content,
                })
                .collect(),
            stream: false,
            options: OllamaOptions {
                temperature: self.temperature,
            },
        };
        let url = format!("{}/api/chat", self.base);
        debug!(model = %self.model, turns = req.messages.len(), "ollama chat request");
        let resp = self.http.post(url).json(&req).send().await?;
        if !resp.status().is_success() {
            return Err(anyhow!("ollama error: {}", resp.status()));
        }
        let body: OllamaChatResponse = resp.json().await?;
        Ok(body.message.content)
    }
}
