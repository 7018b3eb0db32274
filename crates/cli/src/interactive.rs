//! The attached session loop: stdin commands, socket frames and approval
//! deadlines multiplexed on one task.

use std::io::Write;

use agentrelay_engine::{
    Connector, ControllerError, SendOutcome, SessionApi, SessionController, SessionEvent,
    StartOptions,
};
use agentrelay_protocol::SessionMode;
use chrono::Utc;
use console::style;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::render::{message_block, Renderer};

/// One line typed at the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineCommand {
    Send(String),
    Cancel,
    Approve(String),
    Deny(String),
    Switch {
        mode: SessionMode,
        prompt: Option<String>,
    },
    Quit,
    Help,
    Empty,
    Invalid(String),
}

pub fn parse_line(line: &str) -> LineCommand {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return LineCommand::Empty;
    }
    let Some(rest) = trimmed.strip_prefix('/') else {
        return LineCommand::Send(trimmed.to_string());
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };
    let arg = (!arg.is_empty()).then(|| arg.to_string());

    match name {
        "cancel" => LineCommand::Cancel,
        "quit" | "exit" => LineCommand::Quit,
        "help" => LineCommand::Help,
        "approve" => match arg {
            Some(id) => LineCommand::Approve(id),
            None => LineCommand::Invalid("usage: /approve <id>".into()),
        },
        "deny" => match arg {
            Some(id) => LineCommand::Deny(id),
            None => LineCommand::Invalid("usage: /deny <id>".into()),
        },
        "retry" | "renew" | "fork" => match name.parse::<SessionMode>() {
            Ok(mode) => LineCommand::Switch { mode, prompt: arg },
            Err(e) => LineCommand::Invalid(e),
        },
        other => LineCommand::Invalid(format!("unknown command: /{}", other)),
    }
}

const HELP: &str = "\
/cancel              stop the running turn
/approve <id>        approve a pending tool call
/deny <id>           deny a pending tool call
/retry [prompt]      resume the conversation in a new session
/renew [prompt]      start over in a new session
/fork [prompt]       branch into a new session with this transcript
/quit                detach
anything else is sent to the agent";

fn print(text: &str) {
    if text.is_empty() {
        return;
    }
    let mut stdout = std::io::stdout();
    let _ = stdout.write_all(text.as_bytes());
    let _ = stdout.flush();
}

fn notice(text: impl std::fmt::Display) {
    print(&format!("{}\n", style(text).dim()));
}

fn failure(text: impl std::fmt::Display) {
    print(&format!("{} {}\n", style("error:").red().bold(), text));
}

/// Print the current transcript and pending approvals, dropping the events
/// that built them.
pub fn print_transcript<C: Connector, A: SessionApi>(
    controller: &SessionController<C, A>,
    events: &mut UnboundedReceiver<SessionEvent>,
) {
    while events.try_recv().is_ok() {}
    let mut renderer = Renderer::new();
    for message in controller.state().transcript.messages() {
        print(&message_block(message));
    }
    for request in controller.state().approvals.pending() {
        print(&renderer.render(&SessionEvent::ApprovalRequested(request.clone())));
    }
}

/// Run until stdin closes or `/quit`.
pub async fn run<C: Connector, A: SessionApi>(
    controller: &mut SessionController<C, A>,
    mut events: UnboundedReceiver<SessionEvent>,
    settings: &Settings,
) -> anyhow::Result<()> {
    let mut renderer = Renderer::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    notice("attached; /help for commands");

    loop {
        let deadline = controller.next_approval_deadline();
        let expiry = async move {
            match deadline {
                Some(at) => {
                    let wait = (at - Utc::now()).to_std().unwrap_or_default();
                    tokio::time::sleep(wait).await;
                }
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;

            Some(event) = events.recv() => {
                print(&renderer.render(&event));
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    debug!(component = "cli", event = "cli.stdin.closed", "stdin closed");
                    break;
                };
                if !handle_line(controller, settings, parse_line(&line)).await {
                    break;
                }
            }
            _ = expiry => {
                controller.expire_approvals();
            }
            // Follow-up IO runs in the handler, where no branch can cancel it.
            effects = controller.next_effects() => {
                if let Err(e) = controller.follow_up(effects).await {
                    warn!(
                        component = "cli",
                        event = "cli.pump.failed",
                        error = %e,
                        "Follow-up after inbound frame failed"
                    );
                    failure(e);
                }
            }
        }
    }

    controller.disconnect().await;
    while let Ok(event) = events.try_recv() {
        print(&renderer.render(&event));
    }
    Ok(())
}

/// Returns false when the loop should end.
async fn handle_line<C: Connector, A: SessionApi>(
    controller: &mut SessionController<C, A>,
    settings: &Settings,
    command: LineCommand,
) -> bool {
    match command {
        LineCommand::Empty => {}
        LineCommand::Quit => return false,
        LineCommand::Help => print(&format!("{}\n", HELP)),
        LineCommand::Invalid(message) => failure(message),
        LineCommand::Send(content) => {
            match controller.submit(content, settings.input_options()).await {
                SendOutcome::Sent => {}
                SendOutcome::NotConnected => failure("not connected; /retry to resume"),
                SendOutcome::Failed => failure("send failed"),
            }
        }
        LineCommand::Cancel => {
            if controller.cancel().await != SendOutcome::Sent {
                failure("cancel was not delivered");
            }
        }
        LineCommand::Approve(id) => decide(controller, &id, true).await,
        LineCommand::Deny(id) => decide(controller, &id, false).await,
        LineCommand::Switch { mode, prompt } => {
            let Some(task_id) = controller.task_id().map(str::to_string) else {
                failure(ControllerError::NoTask);
                return true;
            };
            let carried = (mode == SessionMode::Fork).then(|| controller.carried_context());
            info!(
                component = "cli",
                event = "cli.mode_switch",
                task_id = %task_id,
                mode = %mode,
                "Switching session"
            );
            let options = StartOptions {
                prompt,
                carried,
                scroll_offset: None,
            };
            match controller.start(&task_id, mode, options).await {
                Ok(info) => notice(format!("session {}", info.id)),
                // StartFailed already rendered the reason.
                Err(e) => debug!(
                    component = "cli",
                    event = "cli.mode_switch.failed",
                    error = %e,
                    "Mode switch failed"
                ),
            }
        }
    }
    true
}

async fn decide<C: Connector, A: SessionApi>(
    controller: &mut SessionController<C, A>,
    request_id: &str,
    approved: bool,
) {
    if let Err(e) = controller.respond_to_approval(request_id, approved).await {
        failure(e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_sent() {
        assert_eq!(parse_line("  fix the bug  "), LineCommand::Send("fix the bug".into()));
        assert_eq!(parse_line("   "), LineCommand::Empty);
    }

    #[test]
    fn approval_commands_need_an_id() {
        assert_eq!(parse_line("/approve req-1"), LineCommand::Approve("req-1".into()));
        assert_eq!(parse_line("/deny  req-2 "), LineCommand::Deny("req-2".into()));
        assert!(matches!(parse_line("/approve"), LineCommand::Invalid(_)));
    }

    #[test]
    fn mode_commands_take_an_optional_prompt() {
        assert_eq!(
            parse_line("/fork try another approach"),
            LineCommand::Switch {
                mode: SessionMode::Fork,
                prompt: Some("try another approach".into()),
            }
        );
        assert_eq!(
            parse_line("/retry"),
            LineCommand::Switch {
                mode: SessionMode::Retry,
                prompt: None,
            }
        );
        assert_eq!(
            parse_line("/renew"),
            LineCommand::Switch {
                mode: SessionMode::Renew,
                prompt: None,
            }
        );
    }

    #[test]
    fn control_commands() {
        assert_eq!(parse_line("/cancel"), LineCommand::Cancel);
        assert_eq!(parse_line("/quit"), LineCommand::Quit);
        assert_eq!(parse_line("/help"), LineCommand::Help);
        assert!(matches!(parse_line("/bogus"), LineCommand::Invalid(_)));
    }
}
