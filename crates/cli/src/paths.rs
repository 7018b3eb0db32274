//! Path resolution for AgentRelay data files.
//!
//! Resolved once at startup from: `--data-dir` > `AGENTRELAY_DATA_DIR` env > `~/.agentrelay`.

use std::io;
use std::path::{Path, PathBuf};

use anyhow::Context;

pub const DATA_DIR_ENV: &str = "AGENTRELAY_DATA_DIR";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Priority: `explicit` arg > `env_value` > `~/.agentrelay`.
    pub fn resolve(explicit: Option<&Path>, env_value: Option<String>) -> anyhow::Result<Self> {
        let root = if let Some(p) = explicit {
            p.to_path_buf()
        } else if let Some(env_val) = env_value.filter(|v| !v.trim().is_empty()) {
            PathBuf::from(env_val)
        } else {
            dirs::home_dir()
                .context("HOME directory not found; pass --data-dir")?
                .join(".agentrelay")
        };
        Ok(Self { root })
    }

    pub fn from_env(explicit: Option<&Path>) -> anyhow::Result<Self> {
        Self::resolve(explicit, std::env::var(DATA_DIR_ENV).ok())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Create the data dir and its subdirectories.
    pub fn ensure_dirs(&self) -> io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.log_dir())?;
        Ok(())
    }
}
