use agent_host::{
    classify_command, AgentHost, DangerLevel, Orchestrator, RelayOutcome, RunRequest,
};
use anyhow::{bail, Context, Result};
use clap::Parser;
use dialoguer::Password;
use services::{describe_host, extract_scripts, NewScript, ScriptStore};
use shared::events::RunEvent;
use shared::script::RunResult;
use std::fs;
use std::future::Future;
use std::path::Path;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

mod cli;
mod utils;

use cli::{CliArgs, Command, ScriptsAction};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = CliArgs::parse();
    let config = args.config.clone().or_else(utils::config_path);
    let (settings, found) = utils::load_settings_or_default(config.as_deref());
    if !found {
        if let Some(path) = &config {
            if let Err(e) = utils::save_settings(path, &settings) {
                warn!("could not write default settings: {}", e);
            }
        }
    }
    let open_store = || match &args.data_dir {
        Some(dir) => ScriptStore::open(dir),
        None => ScriptStore::open_default(),
    };

    match args.command {
        Command::Run {
            target,
            run_id,
            no_password_handling,
        } => {
            let store = open_store()?;
            let script = load_target(&target, &store)?;
            let run_id = run_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let mut request = RunRequest::new(run_id, script);
            if no_password_handling {
                request = request.without_password_handling();
            }
            let host = AgentHost::new(settings);
            let result = run_interactive(&host, request, ask_password).await?;
            std::process::exit(result.exit_code);
        }
        Command::Exec { command } => {
            let command = command.join(" ");
            if classify_command(&command) == DangerLevel::NeedsSudo {
                println!("note: this command uses sudo and cannot prompt here; try `run` instead");
            }
            let host = AgentHost::new(settings);
            let result = host.execute(&command).await?;
            print!("{}", result.output);
            if !result.output.is_empty() && !result.output.ends_with('\n') {
                println!();
            }
            if agent_host::needs_elevation(&result) {
                eprintln!("the command may need administrator rights");
            }
            std::process::exit(result.exit_code);
        }
        Command::Ask { message } => {
            let mut store = open_store()?;
            let mut host = AgentHost::new(settings);
            host.prime(&describe_host()).await?;
            let reply = host.ask(&message.join(" ")).await?;
            let extracted = extract_scripts(std::slice::from_ref(&reply));
            match reply.script_payload() {
                Some(payload) if !payload.response_message.is_empty() => {
                    println!("{}", payload.response_message)
                }
                Some(_) => {}
                None => println!("{}", reply.text),
            }
            if !extracted.is_empty() {
                let ids: Vec<String> = extracted.iter().map(|s| s.id.clone()).collect();
                store.merge_extracted(extracted)?;
                for id in ids {
                    println!("saved script {} (run it with `linux-helper run {}`)", id, id);
                }
            }
        }
        Command::Scripts { action } => {
            let mut store = open_store()?;
            scripts_command(&mut store, action)?;
        }
        Command::Host { json } => {
            let host = describe_host();
            if json {
                println!("{}", serde_json::to_string_pretty(&host)?);
            } else {
                println!("{}", host.to_context());
            }
        }
        Command::Theme { theme } => {
            let mut store = open_store()?;
            match theme {
                Some(theme) => {
                    store.set_theme(theme)?;
                    println!("theme set to {:?}", theme);
                }
                None => match store.theme() {
                    Some(theme) => println!("{:?}", theme),
                    None => println!("no theme preference saved"),
                },
            }
        }
    }
    Ok(())
}

/// A saved script id wins over a file of the same name.
fn load_target(target: &str, store: &ScriptStore) -> Result<String> {
    if let Some(script) = store.get(target) {
        return Ok(script.content.clone());
    }
    let path = Path::new(target);
    fs::read_to_string(path).with_context(|| format!("no saved script or file named {}", target))
}

/// Stream a run to the terminal, asking for the password when sudo does.
///
/// The run and the password prompt each get their own task, so the timeout
/// and Ctrl-C keep working while the user is typing.
async fn run_interactive<F, Fut>(
    host: &AgentHost,
    request: RunRequest,
    ask: F,
) -> Result<RunResult>
where
    F: Fn() -> Fut + Clone + Send + 'static,
    Fut: Future<Output = Result<Zeroizing<String>>> + Send + 'static,
{
    let run_id = request.run_id.clone();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut run = host.spawn_run(request, tx)?;
    let mut prompt: Option<JoinHandle<()>> = None;

    let result = loop {
        tokio::select! {
            joined = &mut run => break joined.context("run task failed")?,
            Some(event) = rx.recv() => match event {
                RunEvent::CredentialRequested { run_id } => {
                    let relay = relay_password(host.orchestrator().clone(), run_id, ask.clone());
                    prompt = Some(tokio::spawn(relay));
                }
                other => print_event(other),
            },
            _ = tokio::signal::ctrl_c() => {
                let outcome = host.cancel_run(&run_id);
                if let Some(reason) = outcome.reason {
                    warn!("{}", reason);
                }
            }
        }
    };
    if let Some(prompt) = prompt {
        prompt.abort();
    }
    // the run is over; print what it sent last
    while let Ok(event) = rx.try_recv() {
        print_event(event);
    }

    if !result.success() {
        eprintln!("exit code {}", result.exit_code);
    }
    Ok(result)
}

async fn relay_password<F, Fut>(orchestrator: Orchestrator, run_id: String, ask: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Zeroizing<String>>>,
{
    match ask().await {
        Ok(password) => {
            let outcome = RelayOutcome::from(orchestrator.supply_credential(&run_id, &password));
            if let Some(reason) = outcome.reason {
                eprintln!("{}", reason);
            }
        }
        Err(e) => warn!(run_id = %run_id, "could not read the password: {}", e),
    }
}

fn print_event(event: RunEvent) {
    match event {
        RunEvent::Log { line, is_error, .. } => {
            if is_error {
                eprintln!("{}", line);
            } else {
                println!("{}", line);
            }
        }
        RunEvent::CredentialRequested { .. } => {}
        RunEvent::Finished { run_id, exit_code } => {
            info!(run_id = %run_id, exit_code, "run complete");
        }
    }
}

async fn ask_password() -> Result<Zeroizing<String>> {
    let password = tokio::task::spawn_blocking(|| {
        Password::new()
            .with_prompt("[sudo] password")
            .allow_empty_password(true)
            .interact()
    })
    .await??;
    Ok(Zeroizing::new(password))
}

fn scripts_command(store: &mut ScriptStore, action: ScriptsAction) -> Result<()> {
    match action {
        ScriptsAction::List => {
            if store.seed_demo_if_empty()? {
                info!("added the demo script");
            }
            for script in store.list() {
                println!(
                    "{}  {}  {}",
                    script.created_at.format("%Y-%m-%d %H:%M"),
                    script.id,
                    script.title
                );
            }
        }
        ScriptsAction::Show { id } => {
            let Some(script) = store.get(&id) else {
                bail!("no saved script with id {}", id);
            };
            println!("{}\n", script.title);
            if !script.description.is_empty() {
                println!("{}\n", script.description);
            }
            println!("{}", utils::indent(&script.content, 4));
        }
        ScriptsAction::Add {
            file,
            title,
            description,
        } => {
            let content = fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            agent_host::validate_script(&content)?;
            let script = store.add(NewScript {
                title,
                description,
                content,
                message_id: None,
            })?;
            println!("saved script {}", script.id);
        }
        ScriptsAction::Remove { id } => {
            if !store.remove(&id)? {
                bail!("no saved script with id {}", id);
            }
            println!("removed {}", id);
        }
    }
    Ok(())
}
