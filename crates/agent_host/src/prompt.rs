//! Password prompt detection for streamed script output.
//!
//! sudo prints its prompt on stdout or stderr depending on platform and
//! configuration, so the same rules are applied to both streams.

use regex::Regex;
use std::sync::LazyLock;

/// Name of the privileged-execution tool whose prompts we answer.
pub const PRIVILEGE_TOOL: &str = "sudo";

static TAGGED_PROMPT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[^\]]+\]\s*(?:password\s+for|senha\s+para)").expect("valid regex"));

static TRAILING_PROMPT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:password|senha)\s*:$").expect("valid regex"));

/// Whether `text` looks like a request for a password.
///
/// Case-insensitive. Matches `[sudo] password for ...` (and the pt_BR
/// `[sudo] senha para ...`), any text mentioning
/// both "password" and "sudo", and text ending in `password:` or `senha:`.
pub fn is_credential_prompt(text: &str) -> bool {
    let lower = text.to_lowercase();
    if TAGGED_PROMPT.is_match(&lower) {
        return true;
    }
    if lower.contains("password") && lower.contains(PRIVILEGE_TOOL) {
        return true;
    }
    TRAILING_PROMPT.is_match(lower.trim())
}
