//! AgentRelay engine
//!
//! Reconciles a live agent session stream with persisted history: frame
//! decoding, payload normalization, delta reassembly, deduplication,
//! approvals and mode switches. The pure core lives in [`transition`];
//! [`connection`] and [`controller`] drive it from a socket and the REST API.

pub mod approval;
pub mod connection;
pub mod controller;
pub mod decoder;
pub mod dedup;
pub mod error;
pub mod mode_switch;
pub mod normalizer;
pub mod reassembler;
pub mod rest;
pub mod scroll;
pub mod transcript;
pub mod transition;
pub mod transport;

#[cfg(test)]
mod testing;

use std::time::Duration;

pub use approval::{ApprovalFlow, ApprovalTimeoutAction};
pub use connection::{
    ConnectionState, ConnectionStatus, Connector, FrameSocket, SendOutcome, SessionConnection,
    UserInputOptions,
};
pub use controller::{SessionController, StartOptions};
pub use error::{ApiError, ApprovalError, ControllerError, TransportError};
pub use rest::{HttpSessionApi, SessionApi};
pub use scroll::{ScrollCommand, ScrollTracker};
pub use transcript::{EntryOrigin, Transcript, TranscriptEntry};
pub use transition::{transition, Effect, EngineState, Input, SessionEvent};
pub use transport::{resolve_ws_url, WsConnector};

pub const DEFAULT_APPROVAL_TIMEOUT: Duration = Duration::from_secs(300);

/// Engine knobs the CLI reads from config
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub approval_timeout_action: ApprovalTimeoutAction,
    /// Deadline for approval frames that arrive without `timeoutAt`
    pub approval_default_timeout: Duration,
    pub scroll_restore_max_attempts: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            approval_timeout_action: ApprovalTimeoutAction::default(),
            approval_default_timeout: DEFAULT_APPROVAL_TIMEOUT,
            scroll_restore_max_attempts: scroll::DEFAULT_MAX_RESTORE_ATTEMPTS,
        }
    }
}

/// The production controller: tokio-tungstenite socket + reqwest REST.
pub type HttpSessionController = SessionController<WsConnector, HttpSessionApi>;

impl HttpSessionController {
    pub fn over_http(base_url: &str, config: &EngineConfig) -> Result<Self, ApiError> {
        Ok(SessionController::new(
            WsConnector,
            HttpSessionApi::new(base_url)?,
            config,
        ))
    }
}
