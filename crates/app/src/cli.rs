//! Command-line arguments.

use clap::{Parser, Subcommand};
use shared::settings::ThemePreference;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "linux-helper",
    version,
    about = "Local AI helper that writes and runs Linux scripts.",
    long_about = None
)]
pub struct CliArgs {
    /// Settings file (JSON). Defaults to the per-user config directory.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Directory holding saved scripts and preferences.
    #[arg(long, global = true, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a script file or a saved script, answering sudo prompts interactively.
    Run {
        /// Path to a script, or the id of a saved script.
        target: String,

        /// Identifier for this run. Generated when omitted.
        #[arg(long, value_name = "ID")]
        run_id: Option<String>,

        /// Do not rewrite sudo or ask for a password.
        #[arg(long)]
        no_password_handling: bool,
    },

    /// Run a single command without interaction and print its output.
    Exec {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Ask the local model. Scripts in the reply are saved.
    Ask {
        #[arg(required = true, trailing_var_arg = true)]
        message: Vec<String>,
    },

    /// Manage saved scripts.
    Scripts {
        #[command(subcommand)]
        action: ScriptsAction,
    },

    /// Describe this machine.
    Host {
        #[arg(long)]
        json: bool,
    },

    /// Show or set the theme preference.
    Theme {
        #[arg(value_parser = parse_theme)]
        theme: Option<ThemePreference>,
    },
}

#[derive(Debug, Subcommand)]
pub enum ScriptsAction {
    List,
    Show {
        id: String,
    },
    /// Save a script from a file.
    Add {
        file: PathBuf,
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    Remove {
        id: String,
    },
}

fn parse_theme(s: &str) -> Result<ThemePreference, String> {
    s.parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run() {
        let args = CliArgs::parse_from(["linux-helper", "run", "fix.sh", "--run-id", "r1"]);
        match args.command {
            Command::Run {
                target,
                run_id,
                no_password_handling,
            } => {
                assert_eq!(target, "fix.sh");
                assert_eq!(run_id.as_deref(), Some("r1"));
                assert!(!no_password_handling);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_exec_keeps_flags() {
        let args = CliArgs::parse_from(["linux-helper", "exec", "ls", "-la", "/tmp"]);
        match args.command {
            Command::Exec { command } => assert_eq!(command, vec!["ls", "-la", "/tmp"]),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_theme() {
        let args = CliArgs::parse_from(["linux-helper", "theme", "dark"]);
        assert!(matches!(
            args.command,
            Command::Theme {
                theme: Some(ThemePreference::Dark)
            }
        ));
        assert!(CliArgs::try_parse_from(["linux-helper", "theme", "blue"]).is_err());
    }
}
