//! Client configuration.
//!
//! Layered: command-line flags (which fall back to `AGENTRELAY_*` env vars)
//! > `<data_dir>/config.toml` > built-in defaults.

use std::path::Path;
use std::time::Duration;

use agentrelay_engine::{ApprovalTimeoutAction, EngineConfig, UserInputOptions};
use anyhow::Context;
use serde::{Deserialize, Serialize};

pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:4000";

/// Shape of `config.toml`. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub server_url: Option<String>,
    pub model: Option<String>,
    pub permission_mode: Option<String>,
    pub disable_web_tools: Option<bool>,
    pub approval_timeout_action: Option<ApprovalTimeoutAction>,
    pub approval_default_timeout_secs: Option<u64>,
    pub scroll_restore_max_attempts: Option<u32>,
}

impl FileConfig {
    /// A missing file is an empty layer; a malformed one is an error.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    /// Keys set in `upper` win.
    pub fn layered_under(self, upper: FileConfig) -> FileConfig {
        FileConfig {
            server_url: upper.server_url.or(self.server_url),
            model: upper.model.or(self.model),
            permission_mode: upper.permission_mode.or(self.permission_mode),
            disable_web_tools: upper.disable_web_tools.or(self.disable_web_tools),
            approval_timeout_action: upper
                .approval_timeout_action
                .or(self.approval_timeout_action),
            approval_default_timeout_secs: upper
                .approval_default_timeout_secs
                .or(self.approval_default_timeout_secs),
            scroll_restore_max_attempts: upper
                .scroll_restore_max_attempts
                .or(self.scroll_restore_max_attempts),
        }
    }
}

/// Fully resolved settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub server_url: String,
    pub model: Option<String>,
    pub permission_mode: Option<String>,
    pub disable_web_tools: bool,
    pub engine: EngineConfig,
}

impl Settings {
    pub fn resolve(file: FileConfig, overrides: FileConfig) -> Self {
        let merged = file.layered_under(overrides);
        let defaults = EngineConfig::default();
        Settings {
            server_url: merged
                .server_url
                .filter(|url| !url.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string()),
            model: merged.model,
            permission_mode: merged.permission_mode,
            disable_web_tools: merged.disable_web_tools.unwrap_or(false),
            engine: EngineConfig {
                approval_timeout_action: merged
                    .approval_timeout_action
                    .unwrap_or(defaults.approval_timeout_action),
                approval_default_timeout: merged
                    .approval_default_timeout_secs
                    .filter(|secs| *secs > 0)
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.approval_default_timeout),
                scroll_restore_max_attempts: merged
                    .scroll_restore_max_attempts
                    .unwrap_or(defaults.scroll_restore_max_attempts),
            },
        }
    }

    /// Read `config_path` and lay `overrides` on top.
    pub fn load(config_path: &Path, overrides: FileConfig) -> anyhow::Result<Self> {
        let file = FileConfig::load(config_path)?;
        Ok(Self::resolve(file, overrides))
    }

    pub fn input_options(&self) -> UserInputOptions {
        UserInputOptions {
            model: self.model.clone(),
            permission_mode: self.permission_mode.clone(),
            files: Vec::new(),
            disable_web_tools: self.disable_web_tools.then_some(true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(dir: &tempfile::TempDir, body: &str) -> std::path::PathBuf {
        let path = dir.path().join("config.toml");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(&dir.path().join("config.toml"), FileConfig::default()).unwrap();

        assert_eq!(settings.server_url, DEFAULT_SERVER_URL);
        assert!(!settings.disable_web_tools);
        assert_eq!(settings.engine, EngineConfig::default());
        assert_eq!(settings.input_options(), UserInputOptions::default());
    }

    #[test]
    fn file_values_are_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
server_url = "https://relay.example.com"
model = "sonnet"
disable_web_tools = true
approval_timeout_action = "approve"
approval_default_timeout_secs = 60
scroll_restore_max_attempts = 5
"#,
        );

        let settings = Settings::load(&path, FileConfig::default()).unwrap();

        assert_eq!(settings.server_url, "https://relay.example.com");
        assert_eq!(settings.model.as_deref(), Some("sonnet"));
        assert_eq!(
            settings.engine.approval_timeout_action,
            ApprovalTimeoutAction::Approve
        );
        assert_eq!(settings.engine.approval_default_timeout, Duration::from_secs(60));
        assert_eq!(settings.engine.scroll_restore_max_attempts, 5);

        let options = settings.input_options();
        assert_eq!(options.model.as_deref(), Some("sonnet"));
        assert_eq!(options.disable_web_tools, Some(true));
    }

    #[test]
    fn overrides_beat_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            "server_url = \"http://file:1\"\nmodel = \"from-file\"\n",
        );
        let overrides = FileConfig {
            server_url: Some("http://flag:2".into()),
            approval_timeout_action: Some(ApprovalTimeoutAction::Approve),
            ..FileConfig::default()
        };

        let settings = Settings::load(&path, overrides).unwrap();

        assert_eq!(settings.server_url, "http://flag:2");
        assert_eq!(settings.model.as_deref(), Some("from-file"));
        assert_eq!(
            settings.engine.approval_timeout_action,
            ApprovalTimeoutAction::Approve
        );
    }

    #[test]
    fn zero_timeout_falls_back_to_default() {
        let file = FileConfig {
            approval_default_timeout_secs: Some(0),
            ..FileConfig::default()
        };
        let settings = Settings::resolve(file, FileConfig::default());
        assert_eq!(
            settings.engine.approval_default_timeout,
            agentrelay_engine::DEFAULT_APPROVAL_TIMEOUT
        );
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "approval_timeout_action = \"maybe\"\n");
        assert!(FileConfig::load(&path).is_err());

        let path = write_config(&dir, "unknown_key = 1\n");
        assert!(FileConfig::load(&path).is_err());
    }
}
