//! Saved scripts and UI preferences, persisted as JSON files.
//!
//! Scripts live in `scripts.json`, preferences (theme, whether the demo
//! script was already offered) in `preferences.json`, both under the
//! application data directory unless a directory is given explicitly.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use shared::agent_api::{AgentMessage, MessageKind, Sender};
use shared::script::Script;
use shared::settings::ThemePreference;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::warn;

const SCRIPTS_FILE: &str = "scripts.json";
const PREFERENCES_FILE: &str = "preferences.json";
const DEMO_SCRIPT_ID: &str = "demo-script-1";

static CODE_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```(\w+)?\n([\s\S]*?)```").expect("valid regex"));

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Preferences {
    #[serde(default)]
    theme: Option<ThemePreference>,
    #[serde(default)]
    demo_seeded: bool,
}

/// Fields supplied when saving a new script.
#[derive(Debug, Clone)]
pub struct NewScript {
    pub title: String,
    pub description: String,
    pub content: String,
    pub message_id: Option<String>,
}

pub struct ScriptStore {
    dir: PathBuf,
    scripts: Vec<Script>,
    prefs: Preferences,
}

impl ScriptStore {
    pub fn default_dir() -> PathBuf {
        directories::ProjectDirs::from("com.local", "Linux Helper", "LinuxHelper")
            .map(|p| p.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("./linux-helper"))
    }

    pub fn open_default() -> Result<Self> {
        Self::open(Self::default_dir())
    }

    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating data directory {}", dir.display()))?;
        let mut store = Self {
            dir,
            scripts: Vec::new(),
            prefs: Preferences::default(),
        };
        store.load();
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Re-read both files. Unreadable or malformed files count as empty.
    pub fn load(&mut self) {
        self.scripts = read_json(&self.dir.join(SCRIPTS_FILE)).unwrap_or_default();
        sort_newest_first(&mut self.scripts);
        self.prefs = read_json(&self.dir.join(PREFERENCES_FILE)).unwrap_or_default();
    }

    pub fn save(&self) -> Result<()> {
        write_json(&self.dir.join(SCRIPTS_FILE), &self.scripts)
    }

    fn save_prefs(&self) -> Result<()> {
        write_json(&self.dir.join(PREFERENCES_FILE), &self.prefs)
    }

    /// Scripts, newest first.
    pub fn list(&self) -> &[Script] {
        &self.scripts
    }

    pub fn get(&self, id: &str) -> Option<&Script> {
        self.scripts.iter().find(|s| s.id == id)
    }

    /// Save a script. A script from the same message replaces the old one.
    pub fn add(&mut self, new: NewScript) -> Result<Script> {
        let (id, message_id) = match new.message_id {
            Some(mid) if !mid.is_empty() => (format!("{}-script", mid), mid),
            _ => (
                format!("manual-{}", uuid::Uuid::new_v4()),
                "manual".to_string(),
            ),
        };
        let script = Script {
            id,
            title: new.title,
            description: new.description,
            content: new.content,
            created_at: Utc::now(),
            message_id,
        };
        self.upsert(script.clone());
        sort_newest_first(&mut self.scripts);
        self.save()?;
        Ok(script)
    }

    pub fn remove(&mut self, id: &str) -> Result<bool> {
        let before = self.scripts.len();
        self.scripts.retain(|s| s.id != id);
        let removed = self.scripts.len() != before;
        if removed {
            self.save()?;
        }
        Ok(removed)
    }

    /// Combine scripts extracted from the conversation with the saved ones.
    /// Extracted scripts win on id collisions.
    pub fn merge_extracted(&mut self, extracted: Vec<Script>) -> Result<()> {
        let ids: HashSet<String> = extracted.iter().map(|s| s.id.clone()).collect();
        let mut merged = extracted;
        merged.extend(
            std::mem::take(&mut self.scripts)
                .into_iter()
                .filter(|s| !ids.contains(&s.id)),
        );
        sort_newest_first(&mut merged);
        self.scripts = merged;
        self.save()
    }

    /// Offer the disk-usage demo script the first time the store is empty.
    pub fn seed_demo_if_empty(&mut self) -> Result<bool> {
        if !self.scripts.is_empty() || self.prefs.demo_seeded {
            return Ok(false);
        }
        self.scripts.push(demo_script());
        self.prefs.demo_seeded = true;
        self.save()?;
        self.save_prefs()?;
        Ok(true)
    }

    pub fn theme(&self) -> Option<ThemePreference> {
        self.prefs.theme
    }

    pub fn set_theme(&mut self, theme: ThemePreference) -> Result<()> {
        self.prefs.theme = Some(theme);
        self.save_prefs()
    }

    fn upsert(&mut self, script: Script) {
        match self.scripts.iter_mut().find(|s| s.id == script.id) {
            Some(existing) => *existing = script,
            None => self.scripts.push(script),
        }
    }
}

/// Pull scripts out of agent messages: structured script messages first,
/// otherwise fenced code blocks in the text.
pub fn extract_scripts(messages: &[AgentMessage]) -> Vec<Script> {
    let mut scripts = Vec::new();
    for message in messages.iter().filter(|m| m.sender == Sender::Agent) {
        let created_at = DateTime::parse_from_rfc3339(&message.timestamp)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());

        if message.kind == MessageKind::Script {
            if let Some(payload) = message.script_payload() {
                scripts.push(Script {
                    id: format!("{}-script", message.id),
                    title: payload.title,
                    description: payload.description,
                    content: payload.content,
                    created_at,
                    message_id: message.id.clone(),
                });
                continue;
            }
        }

        for (index, caps) in CODE_BLOCK.captures_iter(&message.text).enumerate() {
            let code = caps[2].trim();
            if code.is_empty() {
                continue;
            }
            let language = caps.get(1).map(|m| m.as_str()).unwrap_or("bash");
            let before = &message.text[..caps.get(0).map(|m| m.start()).unwrap_or(0)];
            let title = before
                .lines()
                .rev()
                .map(|l| l.trim().trim_start_matches('#').trim())
                .find(|l| !l.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("Script {}", index + 1));
            scripts.push(Script {
                id: format!("{}-block-{}", message.id, index),
                title,
                description: format!("{} snippet from the conversation", language),
                content: code.to_string(),
                created_at,
                message_id: message.id.clone(),
            });
            // an undecodable script message contributes its first block only
            if message.kind == MessageKind::Script {
                break;
            }
        }
    }
    scripts
}

fn demo_script() -> Script {
    Script {
        id: DEMO_SCRIPT_ID.to_string(),
        title: "Check disk space".to_string(),
        description: "Shows free disk space, partitions and the largest directories under /home."
            .to_string(),
        content: "#!/bin/bash\n\
                  echo \"=== Disk space ===\"\n\
                  df -h\n\
                  \n\
                  echo \"\"\n\
                  echo \"=== Partitions ===\"\n\
                  lsblk\n\
                  \n\
                  echo \"\"\n\
                  echo \"=== Disk usage by directory (top 10) ===\"\n\
                  du -h --max-depth=1 /home 2>/dev/null | sort -rh | head -10"
            .to_string(),
        created_at: Utc::now(),
        message_id: "demo-message".to_string(),
    }
}

fn sort_newest_first(scripts: &mut [Script]) {
    scripts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    let contents = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&contents) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(path = %path.display(), "ignoring malformed file: {}", e);
            None
        }
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json).with_context(|| format!("writing {}", path.display()))
}
