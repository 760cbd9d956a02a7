use anyhow::{Context, Result};
use shared::settings::AppSettings;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

pub fn config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("com.local", "Linux Helper", "LinuxHelper")
        .map(|proj| proj.config_dir().join("settings.json"))
}

/// Load settings from disk or return defaults.
/// The flag tells whether a settings file was found.
pub fn load_settings_or_default(path: Option<&Path>) -> (AppSettings, bool) {
    let Some(path) = path else {
        return (AppSettings::default(), false);
    };
    match fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str::<AppSettings>(&contents) {
            Ok(settings) => (settings, true),
            Err(e) => {
                warn!(path = %path.display(), "invalid settings, using defaults: {}", e);
                (AppSettings::default(), false)
            }
        },
        Err(_) => (AppSettings::default(), false),
    }
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings)?;
    fs::write(path, json).with_context(|| format!("writing {}", path.display()))
}

/// Indent every line of `text` for display under a heading.
pub fn indent(text: &str, width: usize) -> String {
    let pad = " ".repeat(width);
    text.lines()
        .map(|l| format!("{}{}", pad, l))
        .collect::<Vec<_>>()
        .join("\n")
}
