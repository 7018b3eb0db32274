use std::path::PathBuf;

use agentrelay_engine::ApprovalTimeoutAction;
use agentrelay_protocol::SessionMode;
use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;

use crate::config::FileConfig;

#[derive(Parser, Debug)]
#[command(
    name = "agentrelay",
    version,
    about = "Drive AI agent sessions from the terminal"
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Data directory (config.toml, logs)
    #[arg(long, global = true, env = "AGENTRELAY_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Backend base URL
    #[arg(long, global = true, env = "AGENTRELAY_SERVER_URL")]
    pub server_url: Option<String>,

    /// Model requested with each user input
    #[arg(long, global = true, env = "AGENTRELAY_MODEL")]
    pub model: Option<String>,

    /// Permission mode requested with each user input
    #[arg(long, global = true, env = "AGENTRELAY_PERMISSION_MODE")]
    pub permission_mode: Option<String>,

    /// Ask the agent not to use web tools
    #[arg(
        long,
        global = true,
        env = "AGENTRELAY_DISABLE_WEB_TOOLS",
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    pub disable_web_tools: Option<bool>,

    /// What happens to approvals nobody answers in time (approve|deny)
    #[arg(long, global = true, env = "AGENTRELAY_APPROVAL_TIMEOUT_ACTION")]
    pub approval_timeout_action: Option<ApprovalTimeoutAction>,

    /// Deadline for approvals that arrive without one, in seconds
    #[arg(long, global = true, env = "AGENTRELAY_APPROVAL_DEFAULT_TIMEOUT_SECS")]
    pub approval_default_timeout_secs: Option<u64>,

    /// Layout passes to wait before giving up on a scroll restore
    #[arg(long, global = true, env = "AGENTRELAY_SCROLL_RESTORE_MAX_ATTEMPTS")]
    pub scroll_restore_max_attempts: Option<u32>,
}

impl GlobalArgs {
    /// The flag/env layer of the configuration.
    pub fn overrides(&self) -> FileConfig {
        FileConfig {
            server_url: self.server_url.clone(),
            model: self.model.clone(),
            permission_mode: self.permission_mode.clone(),
            disable_web_tools: self.disable_web_tools,
            approval_timeout_action: self.approval_timeout_action,
            approval_default_timeout_secs: self.approval_default_timeout_secs,
            scroll_restore_max_attempts: self.scroll_restore_max_attempts,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a new session for a task and stay attached
    Start {
        #[arg(long)]
        task: String,

        /// renew starts fresh, retry resumes, fork carries context
        #[arg(long, default_value = "renew")]
        mode: SessionMode,

        /// First message for the agent
        #[arg(long)]
        prompt: Option<String>,
    },

    /// Attach to a session that is already running
    Attach {
        #[arg(long)]
        task: String,

        #[arg(long)]
        session: String,

        /// Socket URL; defaults to /ws/sessions/<session> on the server
        #[arg(long)]
        ws_url: Option<String>,
    },

    /// Print the persisted history of a task
    History {
        #[arg(long)]
        task: String,

        /// Limit to these sessions (repeatable)
        #[arg(long = "session")]
        sessions: Vec<String>,
    },

    /// List pending approvals for a session
    Approvals {
        #[arg(long)]
        session: String,
    },

    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_start_with_mode() {
        let cli = Cli::try_parse_from([
            "agentrelay",
            "start",
            "--task",
            "t1",
            "--mode",
            "fork",
            "--prompt",
            "hi",
        ])
        .unwrap();
        match cli.command {
            Commands::Start { task, mode, prompt } => {
                assert_eq!(task, "t1");
                assert_eq!(mode, SessionMode::Fork);
                assert_eq!(prompt.as_deref(), Some("hi"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn history_takes_repeated_sessions() {
        let cli = Cli::try_parse_from([
            "agentrelay",
            "history",
            "--task",
            "t1",
            "--session",
            "s1",
            "--session",
            "s2",
        ])
        .unwrap();
        match cli.command {
            Commands::History { sessions, .. } => assert_eq!(sessions, vec!["s1", "s2"]),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn global_flags_become_overrides() {
        let cli = Cli::try_parse_from([
            "agentrelay",
            "approvals",
            "--session",
            "s1",
            "--server-url",
            "http://relay:9",
            "--disable-web-tools",
            "--approval-timeout-action",
            "approve",
        ])
        .unwrap();
        let overrides = cli.global.overrides();
        assert_eq!(overrides.server_url.as_deref(), Some("http://relay:9"));
        assert_eq!(overrides.disable_web_tools, Some(true));
        assert_eq!(
            overrides.approval_timeout_action,
            Some(ApprovalTimeoutAction::Approve)
        );
    }

    #[test]
    fn rejects_unknown_mode() {
        assert!(Cli::try_parse_from(["agentrelay", "start", "--task", "t", "--mode", "nope"]).is_err());
    }
}
