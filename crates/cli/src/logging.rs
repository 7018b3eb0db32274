//! File logging for the CLI.
//!
//! The terminal belongs to the transcript, so tracing output goes to
//! `<data_dir>/logs/client.log` only.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

pub const LOG_FILE: &str = "client.log";
pub const FILTER_ENV: &str = "AGENTRELAY_LOG_FILTER";
pub const FORMAT_ENV: &str = "AGENTRELAY_LOG_FORMAT";

const DEFAULT_FILTER: &str = "info,agentrelay_engine=debug,hyper=warn,reqwest=warn,tungstenite=warn";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl LogFormat {
    /// Anything but `pretty` keeps the JSON default.
    pub fn from_setting(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("pretty") => LogFormat::Pretty,
            _ => LogFormat::Json,
        }
    }
}

/// First directive that parses wins; falls back to the built-in default.
fn select_filter(candidates: [Option<String>; 2]) -> (EnvFilter, String) {
    for directive in candidates.into_iter().flatten() {
        if let Ok(filter) = EnvFilter::try_new(&directive) {
            return (filter, directive);
        }
    }
    (EnvFilter::new(DEFAULT_FILTER), DEFAULT_FILTER.to_string())
}

/// Install the global subscriber. Keep the guard alive until exit or
/// buffered lines are lost.
pub fn init_logging(log_dir: &Path) -> anyhow::Result<WorkerGuard> {
    let (filter, directive) = select_filter([
        std::env::var(FILTER_ENV).ok(),
        std::env::var("RUST_LOG").ok(),
    ]);
    let format = LogFormat::from_setting(std::env::var(FORMAT_ENV).ok().as_deref());

    let appender = tracing_appender::rolling::never(log_dir, LOG_FILE);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let layer = match format {
        LogFormat::Json => fmt::layer()
            .with_writer(writer)
            .json()
            .flatten_event(true)
            .with_target(true)
            .with_current_span(true)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .pretty()
            .with_target(true)
            .boxed(),
    };
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .try_init()?;

    tracing::info!(
        component = "logging",
        event = "logging.initialized",
        log_path = %log_dir.join(LOG_FILE).display(),
        format = ?format,
        filter = %directive,
        pid = std::process::id(),
    );
    Ok(guard)
}
