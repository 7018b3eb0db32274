//! AgentRelay CLI
//!
//! Terminal client for agent sessions. `start` and `attach` stay connected
//! and run the interactive loop; `history` and `approvals` are one-shot
//! REST queries.

mod cli;
mod config;
mod interactive;
mod logging;
mod paths;
mod render;

use agentrelay_engine::{HttpSessionApi, HttpSessionController, SessionApi, StartOptions};
use anyhow::Context;
use clap::{CommandFactory, Parser};
use console::style;
use tracing::{info, warn};

use crate::cli::{Cli, Commands};
use crate::config::Settings;
use crate::paths::DataDir;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        let mut command = Cli::command();
        clap_complete::generate(shell, &mut command, "agentrelay", &mut std::io::stdout());
        return Ok(());
    }

    let data_dir = DataDir::from_env(cli.global.data_dir.as_deref())?;
    data_dir
        .ensure_dirs()
        .with_context(|| format!("creating {}", data_dir.root().display()))?;
    let _log_guard = logging::init_logging(&data_dir.log_dir())?;

    let settings = Settings::load(&data_dir.config_path(), cli.global.overrides())?;
    info!(
        component = "cli",
        event = "cli.started",
        server_url = %settings.server_url,
        data_dir = %data_dir.root().display(),
        "AgentRelay CLI starting"
    );

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(cli.command, settings))
}

async fn run(command: Commands, settings: Settings) -> anyhow::Result<()> {
    match command {
        Commands::Start { task, mode, prompt } => {
            let mut controller =
                HttpSessionController::over_http(&settings.server_url, &settings.engine)?;
            let mut events = controller.subscribe();
            let options = StartOptions {
                prompt,
                ..StartOptions::default()
            };
            match controller.start(&task, mode, options).await {
                Ok(session) => {
                    println!("{} {}", style("session").bold(), session.id);
                }
                Err(e) if e.requires_git_init() => {
                    anyhow::bail!(
                        "{}\ninitialize a git repository in the task workspace, then retry",
                        e
                    );
                }
                Err(e) => return Err(e.into()),
            }
            interactive::print_transcript(&controller, &mut events);
            interactive::run(&mut controller, events, &settings).await
        }
        Commands::Attach {
            task,
            session,
            ws_url,
        } => {
            let mut controller =
                HttpSessionController::over_http(&settings.server_url, &settings.engine)?;
            let mut events = controller.subscribe();
            let ws_url = ws_url.unwrap_or_else(|| format!("/ws/sessions/{}", session));
            if let Err(e) = controller.attach(&task, &session, &ws_url).await {
                warn!(
                    component = "cli",
                    event = "cli.attach.failed",
                    session_id = %session,
                    error = %e,
                    "Attach failed"
                );
                return Err(e.into());
            }
            interactive::print_transcript(&controller, &mut events);
            interactive::run(&mut controller, events, &settings).await
        }
        Commands::History { task, sessions } => {
            let api = HttpSessionApi::new(settings.server_url.as_str())?;
            let filter = (!sessions.is_empty()).then_some(sessions.as_slice());
            let messages = api.fetch_messages(&task, filter).await?;
            if messages.is_empty() {
                println!("{}", style("no messages").dim());
            } else {
                println!("{}", render::history_table(&messages));
            }
            Ok(())
        }
        Commands::Approvals { session } => {
            let api = HttpSessionApi::new(settings.server_url.as_str())?;
            let pending = api.fetch_pending_approvals(&session).await?;
            if pending.is_empty() {
                println!("{}", style("no pending approvals").dim());
            } else {
                println!("{}", render::approvals_table(&pending));
                println!(
                    "{}",
                    style("answer with /approve <id> or /deny <id> while attached").dim()
                );
            }
            Ok(())
        }
        Commands::Completions { .. } => Ok(()),
    }
}

